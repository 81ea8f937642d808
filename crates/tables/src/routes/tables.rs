use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::Response,
};

use kyklos_core::{Domain, TableStore as _};

use crate::coerce::Coercer;
use crate::compile::compile;
use crate::error::Error;
use crate::stream::{stream_response, StreamContext};
use crate::Facade;

/// `GET /tables/{entity}` — compile the query string and stream rows.
///
/// Compile failures reject the request before any body byte; once the
/// scan is running, failures travel through the response trailer.
pub async fn stream<D: Domain>(
    State(facade): State<Facade<D>>,
    Path(entity): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, Error> {
    let registry = facade.registry.clone();
    let schema = registry
        .get(&entity)
        .ok_or_else(|| Error::UnknownEntity(entity.clone()))?;
    if !facade.tables().contains(&entity) {
        return Err(Error::UnknownEntity(entity));
    }

    // one consistent snapshot per request
    let tip = facade.tip().map_err(|e| Error::Database(e.to_string()))?;
    let blocks = facade.blocks().snapshot();
    let accounts = facade.accounts().snapshot();

    let coercer = Coercer {
        tip: &tip,
        blocks: blocks.as_ref(),
        accounts: accounts.as_ref(),
    };
    let request = compile(schema, &coercer, &pairs, facade.config.max_limit())?;

    let cancel = facade.cancel.child_token();
    if let Some(secs) = facade.config.request_timeout_secs {
        let deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            deadline.cancel();
        });
    }

    let ctx = StreamContext {
        entity,
        request,
        tip,
        blocks,
        accounts,
        cancel,
    };

    Ok(stream_response(facade.inner.clone(), registry, ctx))
}

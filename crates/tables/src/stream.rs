//! Streaming response dispatch.
//!
//! One request maps to one response: headers first, then encoded rows as
//! body frames, then a trailers frame carrying cursor, row count and the
//! error slot. The table scan runs on a blocking thread and hands byte
//! chunks to the response body through a bounded channel, so backpressure
//! from the socket stalls the scan instead of buffering the result.
//!
//! The JSON array bracket is closed on every exit path, including scan
//! failures and cancellation; mid-stream errors never change the already
//! sent status line.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Response, StatusCode};
use bytes::Bytes;
use http_body::Frame;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kyklos_core::{AccountMap, BlockSlice, Domain, StreamAction, TableStore, TipObservation};

use crate::compile::{CompiledRequest, Format};
use crate::encode::RowEncoder;
use crate::error::Error;
use crate::registry::TableRegistry;

pub const TRAILER_CURSOR: &str = "x-cursor";
pub const TRAILER_COUNT: &str = "x-result-count";
pub const TRAILER_ERROR: &str = "x-error";

/// Response body fed from the scan task; the final frame carries the
/// trailers.
pub struct TrailerBody {
    rx: mpsc::Receiver<Frame<Bytes>>,
}

impl http_body::Body for TrailerBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.get_mut().rx.poll_recv(cx).map(|f| f.map(Ok))
    }
}

struct ChunkSender {
    tx: mpsc::Sender<Frame<Bytes>>,
}

impl ChunkSender {
    /// False when the client is gone; callers treat that like
    /// cancellation.
    fn send(&self, chunk: &str) -> bool {
        if chunk.is_empty() {
            return true;
        }
        self.tx
            .blocking_send(Frame::data(Bytes::copy_from_slice(chunk.as_bytes())))
            .is_ok()
    }

    fn send_trailers(&self, trailers: HeaderMap) {
        let _ = self.tx.blocking_send(Frame::trailers(trailers));
    }
}

/// Everything the scan task needs, captured once at request entry.
pub struct StreamContext {
    pub entity: String,
    pub request: CompiledRequest,
    pub tip: TipObservation,
    pub blocks: Arc<BlockSlice>,
    pub accounts: Arc<AccountMap>,
    pub cancel: CancellationToken,
}

/// Build the streaming response and detach the scan onto a blocking
/// thread.
pub fn stream_response<D: Domain>(
    domain: D,
    registry: Arc<TableRegistry>,
    ctx: StreamContext,
) -> Response<Body> {
    let (tx, rx) = mpsc::channel::<Frame<Bytes>>(32);

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, ctx.request.params.format.content_type())
        .header(
            header::TRAILER,
            format!("{TRAILER_CURSOR}, {TRAILER_COUNT}, {TRAILER_ERROR}"),
        );
    if ctx.request.params.format == Format::Csv {
        if let Some(name) = &ctx.request.params.filename {
            builder = builder.header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", name.replace('"', "")),
            );
        }
    }

    tokio::task::spawn_blocking(move || {
        run_scan(domain, registry, ctx, ChunkSender { tx });
    });

    builder
        .body(Body::new(TrailerBody { rx }))
        .expect("static response parts")
}

fn run_scan<D: Domain>(
    domain: D,
    registry: Arc<TableRegistry>,
    ctx: StreamContext,
    sender: ChunkSender,
) {
    let schema = registry.get(&ctx.entity).expect("checked by the handler");
    let encoder = RowEncoder::new(
        schema,
        &ctx.request.columns,
        &ctx.tip,
        ctx.blocks.as_ref(),
        ctx.accounts.as_ref(),
    );

    let mut count: u64 = 0;
    let mut last_id: u64 = 0;

    let result = match ctx.request.params.format {
        Format::Json => stream_json(
            &domain, &ctx, &encoder, &sender, &mut count, &mut last_id,
        ),
        Format::Csv => stream_csv(
            &domain, &ctx, &encoder, &sender, &mut count, &mut last_id,
        ),
    };

    if let Err(err) = &result {
        tracing::warn!(
            entity = %ctx.entity,
            rows = count,
            error = %err,
            "table stream failed mid-flight"
        );
    } else {
        tracing::debug!(entity = %ctx.entity, rows = count, "table stream complete");
    }

    // without new rows the cursor echoes the request input
    let cursor = if count > 0 {
        last_id.to_string()
    } else {
        ctx.request.params.cursor.clone().unwrap_or_default()
    };

    let mut trailers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&cursor) {
        trailers.insert(TRAILER_CURSOR, v);
    }
    trailers.insert(
        TRAILER_COUNT,
        HeaderValue::from_str(&count.to_string()).expect("numeric header"),
    );
    let error_value = match &result {
        Ok(()) => String::new(),
        Err(err) => err.trailer_value(),
    };
    trailers.insert(
        TRAILER_ERROR,
        HeaderValue::from_str(&error_value).unwrap_or_else(|_| HeaderValue::from_static("DATABASE")),
    );
    sender.send_trailers(trailers);
}

fn stream_json<D: Domain>(
    domain: &D,
    ctx: &StreamContext,
    encoder: &RowEncoder<'_>,
    sender: &ChunkSender,
    count: &mut u64,
    last_id: &mut u64,
) -> Result<(), Error> {
    if !sender.send("[") {
        return Ok(());
    }

    let verbose = ctx.request.params.verbose;
    let limit = ctx.request.params.limit as u64;
    let mut buf = String::with_capacity(1024);

    let result = domain
        .tables()
        .stream(&ctx.entity, &ctx.request.query, |row| {
            if ctx.cancel.is_cancelled() {
                return Ok(StreamAction::Stop);
            }
            buf.clear();
            if *count > 0 {
                buf.push(',');
            }
            if verbose {
                encoder.json_verbose(row, &mut buf);
            } else {
                encoder.json_brief(row, &mut buf);
            }
            if !sender.send(&buf) {
                return Ok(StreamAction::Stop);
            }
            *count += 1;
            *last_id = row.pk();
            if limit > 0 && *count == limit {
                return Ok(StreamAction::Stop);
            }
            Ok(StreamAction::Continue)
        });

    // the bracket closes no matter how the scan ended
    sender.send("]");
    result.map_err(Error::from)
}

fn stream_csv<D: Domain>(
    domain: &D,
    ctx: &StreamContext,
    encoder: &RowEncoder<'_>,
    sender: &ChunkSender,
    count: &mut u64,
    last_id: &mut u64,
) -> Result<(), Error> {
    let mut buf = String::with_capacity(1024);
    encoder.csv_header(&mut buf);
    if !sender.send(&buf) {
        return Ok(());
    }

    let limit = ctx.request.params.limit as u64;

    let result = domain
        .tables()
        .stream(&ctx.entity, &ctx.request.query, |row| {
            if ctx.cancel.is_cancelled() {
                return Ok(StreamAction::Stop);
            }
            buf.clear();
            encoder.csv_row(row, &mut buf);
            if !sender.send(&buf) {
                return Ok(StreamAction::Stop);
            }
            *count += 1;
            *last_id = row.pk();
            if limit > 0 && *count == limit {
                return Ok(StreamAction::Stop);
            }
            Ok(StreamAction::Continue)
        });

    result.map_err(Error::from)
}

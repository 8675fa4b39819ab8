//! This module contains the receive side of a transfer session

// The network thread does one thing: pull frames off the socket, turn each
// named payload into a batch of raw ADC counts, and hand it to the
// processing loop through the batch queue. It never waits on the queue, a
// full queue means the batch is dropped.

use std::io::Read;

use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    monitoring::{Monitor, StatusEvent},
    queue::{BatchSender, SampleBatch},
    session::{Session, SessionState, StopToken},
    wire::{parse_adc_samples, read_config, read_content, read_frame_header, FrameLimits, Sentinel, SessionConfig},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub config: SessionConfig,
    pub batches_enqueued: usize,
    pub batches_dropped: usize,
    /// Control frame that ended the stream, `None` if we stopped on request
    pub terminator: Option<Sentinel>,
}

/// Run one consumer session over `stream` until a control frame, a stop request or an error.
///
/// Errors are always fatal to the session; nothing is retried here. The one
/// exception is the connection closing after a stop was requested, since shutting
/// the socket is how a stop gets through a blocked read.
pub fn receive_session<R: Read>(
    stream: &mut R,
    queue: &mut BatchSender,
    limits: &FrameLimits,
    monitor: &Monitor,
    stop: &StopToken,
) -> Result<ReceiveSummary> {
    let mut session = Session::new("receiver");
    session.advance(SessionState::Config);
    let mut summary = ReceiveSummary {
        config: SessionConfig::default(),
        batches_enqueued: 0,
        batches_dropped: 0,
        terminator: None,
    };
    let result = match stream_frames(stream, queue, limits, monitor, stop, &mut session, &mut summary) {
        Err(Error::ConnectionClosed { context, .. }) if stop.is_stopped() => {
            info!(context, "Connection shut down on stop request");
            Ok(())
        }
        other => other,
    };
    session.close();
    let terminator = result.as_ref().ok().and(summary.terminator.clone());
    monitor.notify(StatusEvent::SessionClosed { terminator });
    result.map(|()| summary)
}

fn stream_frames<R: Read>(
    stream: &mut R,
    queue: &mut BatchSender,
    limits: &FrameLimits,
    monitor: &Monitor,
    stop: &StopToken,
    session: &mut Session,
    summary: &mut ReceiveSummary,
) -> Result<()> {
    summary.config = read_config(stream)?;
    let config = &summary.config;
    info!(interval_ms = config.interval_ms, mode = %config.mode, "Received config");
    monitor.notify(StatusEvent::Configured {
        interval_ms: config.interval_ms,
        mode: config.mode.clone(),
    });
    session.advance(SessionState::Streaming);

    loop {
        if stop.is_stopped() {
            info!("Stop requested, leaving receive loop");
            return Ok(());
        }
        let header = read_frame_header(stream, limits)?;
        if let Some(sentinel) = header.sentinel() {
            // The content length was already consumed with the header
            if header.content_length != 0 {
                warn!(
                    name = %header.name,
                    length = header.content_length,
                    "Control frame carries content, ignoring it"
                );
            }
            if sentinel.is_error() {
                warn!(%sentinel, "Producer ended the stream");
            } else {
                info!(%sentinel, "Received control frame");
            }
            session.advance(SessionState::Draining(sentinel.clone()));
            summary.terminator = Some(sentinel);
            return Ok(());
        }

        let content = read_content(stream, &header)?;
        let samples = parse_adc_samples(&content);
        if samples.is_empty() {
            warn!(name = %header.name, "No ADC values in frame, skipping");
            continue;
        }
        info!(name = %header.name, samples = samples.len(), "Received batch");
        let name = header.name;
        let batch = SampleBatch {
            name: name.clone(),
            interval_ms: summary.config.interval_ms,
            samples,
        };
        let count = batch.len();
        if queue.try_enqueue(batch) {
            summary.batches_enqueued += 1;
            monitor.notify(StatusEvent::BatchQueued {
                name,
                samples: count,
            });
        } else {
            summary.batches_dropped += 1;
            monitor.notify(StatusEvent::BatchDropped { name });
        }
    }
}

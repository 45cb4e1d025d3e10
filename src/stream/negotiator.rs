/// Transport negotiation for one query.
///
/// Transports are tried in priority order against one shared deadline. A
/// connection failure moves on to the next transport; a timeout or a
/// backend-reported error stops negotiation.
use tracing::{debug, info, warn};

use super::deadline::Deadline;
use super::transport::{Transport, build_transports};
use super::{Query, StreamError, StreamSession, TokenSink, TransportKind};

pub struct Negotiator {
    transports: Vec<Box<dyn Transport>>,
}

impl Negotiator {
    #[must_use]
    pub fn new(transports: Vec<Box<dyn Transport>>) -> Self {
        Self { transports }
    }

    /// Negotiator over the standard HTTP transports for `stream_url`.
    #[must_use]
    pub fn for_endpoint(kinds: &[TransportKind], http: &reqwest::Client, stream_url: &str) -> Self {
        Self::new(build_transports(kinds, http, stream_url))
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<TransportKind> {
        self.transports.iter().map(|t| t.kind()).collect()
    }

    /// Stream `query` into `sink`, returning the transport that completed.
    pub async fn run(
        &self,
        query: &Query,
        session: &mut StreamSession,
        deadline: &Deadline,
        sink: &mut (dyn TokenSink + Send),
    ) -> Result<TransportKind, StreamError> {
        let mut failures = Vec::new();

        for transport in &self.transports {
            let kind = transport.kind();
            if deadline.is_expired() {
                session.mark_failed();
                return Err(deadline.timeout_error());
            }

            session.begin(kind);
            debug!(
                "Trying {kind} transport ({:?} of budget left)",
                deadline.remaining()
            );

            let attempt = deadline
                .bound(transport.attempt(query, session, deadline, sink))
                .await;

            match attempt {
                Ok(()) => {
                    session.mark_done();
                    info!("Answer streamed via {kind}");
                    return Ok(kind);
                }
                Err(e @ StreamError::ConnectionFailure { .. }) => {
                    warn!("{e}");
                    session.mark_failed();
                    failures.push(e);
                }
                Err(e) => {
                    warn!("Streaming aborted on {kind}: {e}");
                    session.mark_failed();
                    return Err(e);
                }
            }
        }

        Err(StreamError::Exhausted(failures))
    }
}

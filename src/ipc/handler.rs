//! Command handler backed by a [`ScreeningService`].

use crate::gate::IncomingCall;
use crate::ipc::protocol::{Command, Response};
use crate::ipc::server::CommandHandler;
use crate::service::{PendingMonitor, ScreeningService};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

/// Bridges protocol commands onto the screening service.
///
/// Service calls may block on disk writes or on joining capture threads,
/// so they run on tokio's blocking pool. Monitoring admitted by an
/// `incomingCall` starts in [`CommandHandler::follow_up`], after the
/// verdict line is out.
pub struct ServiceHandler {
    service: Arc<ScreeningService>,
    pending: Mutex<Option<PendingMonitor>>,
}

impl ServiceHandler {
    pub fn new(service: Arc<ScreeningService>) -> Self {
        Self {
            service,
            pending: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &Arc<ScreeningService> {
        &self.service
    }

    fn pending(&self) -> MutexGuard<'_, Option<PendingMonitor>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_blocking<T, F>(&self, f: F) -> std::result::Result<T, Response>
    where
        F: FnOnce(&ScreeningService) -> T + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || f(&service))
            .await
            .map_err(|e| {
                error!(error = %e, "command task failed");
                Response::error(format!("command task failed: {}", e))
            })
    }

    async fn blocking<F>(&self, f: F) -> Response
    where
        F: FnOnce(&ScreeningService) -> Response + Send + 'static,
    {
        self.run_blocking(f).await.unwrap_or_else(|failed| failed)
    }
}

#[async_trait::async_trait]
impl CommandHandler for ServiceHandler {
    async fn handle(&self, command: Command) -> Response {
        match command {
            Command::UpdateScamCache { numbers } => {
                self.blocking(move |service| match service.update_scam_cache(&numbers) {
                    Ok(_) => Response::Ok,
                    Err(e) => Response::error(e),
                })
                .await
            }
            Command::AddScamNumber { number } => {
                self.blocking(move |service| match service.add_scam_number(&number) {
                    Ok(_) => Response::Ok,
                    Err(e) => Response::error(e),
                })
                .await
            }
            Command::GetCachedCount => Response::Count {
                count: self.service.cached_count(),
            },
            Command::ScamDetected { number, reason } => {
                self.blocking(move |service| match service.scam_detected(&number, &reason) {
                    Ok(()) => Response::Ok,
                    Err(e) => Response::error(e),
                })
                .await
            }
            Command::IncomingCall {
                direction,
                number,
                requires_final_response,
            } => {
                let call = IncomingCall {
                    direction,
                    number,
                    requires_final_response,
                };
                match self.run_blocking(move |service| service.admit(&call)).await {
                    Ok(admission) => {
                        *self.pending() = admission.monitor;
                        Response::from(admission.response)
                    }
                    Err(failed) => failed,
                }
            }
            Command::CallState { state } => {
                self.blocking(move |service| {
                    service.call_state_changed(state);
                    Response::Ok
                })
                .await
            }
        }
    }

    async fn follow_up(&self) {
        let Some(monitor) = self.pending().take() else {
            return;
        };
        match tokio::task::spawn_blocking(move || monitor.start()).await {
            Ok(Ok(())) => {}
            // Already logged and reported through the failure hook
            Ok(Err(e)) => debug!(error = %e, "monitoring not started"),
            Err(e) => error!(error = %e, "monitor task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::{AudioSource, MockAudioSource};
    use crate::cache::ScamNumberCache;
    use crate::cache::store::MemoryStore;
    use crate::contacts::StaticContacts;
    use crate::gate::{CallDirection, Verdict};
    use crate::service::SourceFactory;
    use crate::session::call_state::CallState;
    use crate::sink::CollectorSink;

    fn handler() -> (ServiceHandler, Arc<CollectorSink>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(ScamNumberCache::open(Box::new(Arc::clone(&store))));
        let sink = Arc::new(CollectorSink::new());
        let sources: SourceFactory = Arc::new(|| {
            let (source, _feed) = MockAudioSource::channel();
            Ok(Box::new(source) as Box<dyn AudioSource>)
        });
        let service = ScreeningService::new(
            cache,
            Arc::new(StaticContacts::new(&["5550100"])),
            sink.clone(),
            sources,
        );
        (ServiceHandler::new(Arc::new(service)), sink, store)
    }

    #[tokio::test]
    async fn test_cache_commands() {
        let (handler, _, _) = handler();

        let response = handler
            .handle(Command::UpdateScamCache {
                numbers: vec!["5550199".into(), "555-0199".into(), "5550198".into()],
            })
            .await;
        assert_eq!(response, Response::Ok);
        assert_eq!(
            handler.handle(Command::GetCachedCount).await,
            Response::Count { count: 2 }
        );

        handler
            .handle(Command::AddScamNumber {
                number: "5550197".into(),
            })
            .await;
        assert_eq!(
            handler.handle(Command::GetCachedCount).await,
            Response::Count { count: 3 }
        );
    }

    #[tokio::test]
    async fn test_blank_add_is_an_error_response() {
        let (handler, _, _) = handler();
        let response = handler
            .handle(Command::AddScamNumber { number: " ".into() })
            .await;
        assert!(matches!(response, Response::Error { .. }));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_reported() {
        let (handler, _, store) = handler();
        store.set_fail_writes(true);
        let response = handler
            .handle(Command::UpdateScamCache {
                numbers: vec!["5550199".into()],
            })
            .await;
        assert!(matches!(response, Response::Error { .. }));
        assert_eq!(
            handler.handle(Command::GetCachedCount).await,
            Response::Count { count: 0 }
        );
    }

    #[tokio::test]
    async fn test_incoming_call_and_call_state() {
        let (handler, sink, _) = handler();

        let response = handler
            .handle(Command::IncomingCall {
                direction: CallDirection::Inbound,
                number: "5550142".into(),
                requires_final_response: true,
            })
            .await;
        assert!(matches!(
            response,
            Response::Verdict {
                verdict: Verdict::AllowAndMonitor,
                allow: true,
                reject: false
            }
        ));
        // Nothing is recorded until the verdict has gone out
        assert!(sink.events().is_empty());

        handler.follow_up().await;
        assert_eq!(sink.count("callStarted"), 1);
        assert_eq!(
            handler.service().active_caller().as_deref(),
            Some("5550142")
        );

        handler
            .handle(Command::CallState {
                state: CallState::Idle,
            })
            .await;
        assert_eq!(sink.count("callStarted"), 1);
        assert_eq!(sink.count("callEnded"), 1);
    }

    #[tokio::test]
    async fn test_contact_call_is_allowed() {
        let (handler, sink, _) = handler();
        let response = handler
            .handle(Command::IncomingCall {
                direction: CallDirection::Inbound,
                number: "555 0100".into(),
                requires_final_response: false,
            })
            .await;
        assert!(matches!(
            response,
            Response::Verdict {
                verdict: Verdict::Allow,
                ..
            }
        ));
        handler.follow_up().await;
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_scam_detected_emits_alert() {
        let (handler, sink, _) = handler();
        let response = handler
            .handle(Command::ScamDetected {
                number: "5550142".into(),
                reason: "bank impersonation".into(),
            })
            .await;
        assert_eq!(response, Response::Ok);
        assert_eq!(sink.count("scamAlert"), 1);
        assert_eq!(handler.service().cached_count(), 1);
    }
}

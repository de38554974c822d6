//! Per-applet APDU sender

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use nexum_apdu_core::{Aid, Response};
use tracing::{debug, error, warn};

use crate::callback::{ResultCallback, WaitCallback};
use crate::config::SenderConfig;
use crate::dispatcher::Dispatcher;
use crate::error::PipelineError;
use crate::executor::CommandPipeline;
use crate::gate::GatePermit;
use crate::lifecycle::ChannelLifecycle;
use crate::registry::ChannelRegistry;
use crate::request::RequestProvider;
use crate::session::{ChannelOwner, NoSessions, SessionTracker};
use crate::store::{KeyValueStore, MemoryStore};
use crate::transport::LogicalChannelTransport;

/// Sends command sequences to one applet over a logical channel
///
/// Each [`send`](Self::send) takes the applet's gate, opens (or reuses) the
/// channel, runs the request on the dispatcher thread, closes the channel
/// unless a session is active, releases the gate and then delivers the
/// outcome to the callback.
///
/// Callbacks run on the dispatcher. Sending from inside a callback is
/// allowed since the gate is already released by then.
#[derive(Debug, Clone)]
pub struct ApduSender {
    inner: Arc<SenderInner>,
}

#[derive(Debug)]
struct SenderInner {
    lifecycle: Arc<ChannelLifecycle>,
    pipeline: CommandPipeline,
    session: Arc<dyn SessionTracker>,
    dispatcher: Arc<Dispatcher>,
}

impl ApduSender {
    /// Start building a sender for `aid`
    pub fn builder(aid: Aid, transport: Arc<dyn LogicalChannelTransport>) -> ApduSenderBuilder {
        ApduSenderBuilder::new(aid, transport)
    }

    /// Applet identifier
    pub fn aid(&self) -> &Aid {
        self.inner.lifecycle.aid()
    }

    /// Dispatcher running this sender's pipelines
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// Whether a channel to the applet is believed to be open
    pub fn is_channel_open(&self) -> bool {
        self.inner.lifecycle.is_open()
    }

    /// Run a request, delivering the outcome to `callback` on the dispatcher
    ///
    /// Waits up to the gate timeout for a concurrent run of the same applet,
    /// or fails at once with [`PipelineError::ChannelBusy`] when called from
    /// any dispatcher thread.
    pub fn send<P, C>(&self, provider: P, callback: C)
    where
        P: RequestProvider + 'static,
        C: ResultCallback,
    {
        self.submit(provider, callback, false);
    }

    /// Run a request and block until it finishes
    ///
    /// On the dispatcher thread the run happens inline.
    pub fn send_and_wait<P>(&self, provider: P) -> Result<Bytes, PipelineError>
    where
        P: RequestProvider + 'static,
    {
        self.send_and_wait_with_policy(provider, |_: &Response| true)
    }

    /// Like [`send_and_wait`](Self::send_and_wait), with a policy deciding
    /// whether to continue after each intermediate response
    pub fn send_and_wait_with_policy<P, F>(
        &self,
        provider: P,
        policy: F,
    ) -> Result<Bytes, PipelineError>
    where
        P: RequestProvider + 'static,
        F: FnMut(&Response) -> bool + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let inline = self.inner.dispatcher.is_current();
        self.submit(provider, WaitCallback { sender, policy }, inline);

        receiver.recv().unwrap_or_else(|_| {
            error!(aid = %self.aid(), "Pipeline finished without delivering a result");
            Err(PipelineError::transport_failure())
        })
    }

    /// Close the channel left open by a session or a previous process
    ///
    /// Waits for the gate on the calling thread (failing fast on a
    /// dispatcher), then closes on the dispatcher and blocks until done.
    /// Returns `false` when the gate could not be taken.
    pub fn close_any_open_channel(&self) -> bool {
        self.inner.close_any_open_channel()
    }

    fn submit<P, C>(&self, provider: P, callback: C, inline: bool)
    where
        P: RequestProvider + 'static,
        C: ResultCallback,
    {
        let inner = &self.inner;
        let fail_fast = Dispatcher::in_any();

        let Some(permit) = inner.lifecycle.slot().gate().try_permit(fail_fast) else {
            warn!(aid = %self.aid(), fail_fast, "Logical channel is still in use");
            inner.deliver(inline, move || callback.on_exception(PipelineError::ChannelBusy));
            return;
        };

        let session_active = inner.session.has_active_session();
        if session_active {
            let owner: Weak<SenderInner> = Arc::downgrade(inner);
            inner.session.note_channel_open(owner);
        }

        let job_inner = Arc::clone(inner);
        let job = move || job_inner.process(permit, provider, callback, !session_active);
        if inline {
            job();
        } else {
            inner.dispatcher.post(job);
        }
    }
}

impl SenderInner {
    fn process<P, C>(
        &self,
        permit: GatePermit,
        provider: P,
        mut callback: C,
        close_immediately: bool,
    ) where
        P: RequestProvider,
        C: ResultCallback,
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(provider, &mut callback, close_immediately)
        }))
        .unwrap_or_else(|_| {
            error!(aid = %self.lifecycle.aid(), "Pipeline panicked");
            if close_immediately {
                self.lifecycle.close_persisted();
            }
            Err(PipelineError::transport_failure())
        });
        drop(permit);

        match outcome {
            Ok(payload) => callback.on_result(payload),
            Err(error) => {
                debug!(aid = %self.lifecycle.aid(), %error, "Pipeline failed");
                callback.on_exception(error)
            }
        }
    }

    fn execute<P, C>(
        &self,
        provider: P,
        callback: &mut C,
        close_immediately: bool,
    ) -> Result<Bytes, PipelineError>
    where
        P: RequestProvider,
        C: ResultCallback,
    {
        let channel = self.lifecycle.ensure_open()?;
        let result = self.pipeline.run(&self.lifecycle, &channel, provider, |response| {
            callback.should_continue(response)
        });
        self.lifecycle.close(channel.handle, close_immediately);
        result.map(Response::into_payload)
    }

    fn deliver(&self, inline: bool, delivery: impl FnOnce() + Send + 'static) {
        if inline {
            delivery();
        } else {
            self.dispatcher.post(delivery);
        }
    }
}

impl ChannelOwner for SenderInner {
    fn close_any_open_channel(&self) -> bool {
        let on_dispatcher = self.dispatcher.is_current();
        let Some(permit) = self.lifecycle.slot().gate().try_permit(Dispatcher::in_any()) else {
            warn!(aid = %self.lifecycle.aid(), "Logical channel busy, not closing it");
            return false;
        };

        if on_dispatcher {
            self.lifecycle.close_persisted();
            return true;
        }

        let lifecycle = Arc::clone(&self.lifecycle);
        let (done, finished) = crossbeam_channel::bounded(1);
        self.dispatcher.post(move || {
            lifecycle.close_persisted();
            drop(permit);
            let _ = done.send(());
        });
        finished.recv().is_ok()
    }
}

/// Builder for [`ApduSender`]
#[derive(Debug)]
pub struct ApduSenderBuilder {
    aid: Aid,
    transport: Arc<dyn LogicalChannelTransport>,
    store: Option<Arc<dyn KeyValueStore>>,
    registry: Option<Arc<ChannelRegistry>>,
    session: Option<Arc<dyn SessionTracker>>,
    dispatcher: Option<Arc<Dispatcher>>,
    config: SenderConfig,
}

impl ApduSenderBuilder {
    fn new(aid: Aid, transport: Arc<dyn LogicalChannelTransport>) -> Self {
        Self {
            aid,
            transport,
            store: None,
            registry: None,
            session: None,
            dispatcher: None,
            config: SenderConfig::default(),
        }
    }

    /// Persist channel state in `store` (in memory by default)
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share gates with other senders of the same registry
    pub fn registry(mut self, registry: Arc<ChannelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Keep channels open while `tracker` reports an active session
    pub fn session_tracker(mut self, tracker: Arc<dyn SessionTracker>) -> Self {
        self.session = Some(tracker);
        self
    }

    /// Run pipelines and callbacks on `dispatcher`
    pub fn dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Sender configuration
    pub const fn config(mut self, config: SenderConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the sender, starting a dispatcher thread if none was given
    pub fn build(self) -> io::Result<ApduSender> {
        let dispatcher = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => Arc::new(Dispatcher::spawn(format!("apdu-{}", self.aid))?),
        };
        let registry = self.registry.unwrap_or_default();
        let slot = registry.slot(&self.aid);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(NoSessions) as Arc<dyn SessionTracker>);

        let pipeline = CommandPipeline::new(Arc::clone(&self.transport), &self.config);
        let lifecycle = Arc::new(ChannelLifecycle::new(self.aid, self.transport, store, slot));

        Ok(ApduSender {
            inner: Arc::new(SenderInner {
                lifecycle,
                pipeline,
                session,
                dispatcher,
            }),
        })
    }
}

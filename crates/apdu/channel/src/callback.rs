//! Result delivery

use bytes::Bytes;
use crossbeam_channel::Sender;
use nexum_apdu_core::Response;

use crate::error::PipelineError;

/// Receives the outcome of one pipeline run
///
/// Exactly one of [`on_result`](Self::on_result) and
/// [`on_exception`](Self::on_exception) is called, after the channel gate
/// was released. Both consume the callback.
pub trait ResultCallback: Send + 'static {
    /// Decide whether to run the next command after a successful one
    ///
    /// Not consulted after the last command.
    fn should_continue(&mut self, _intermediate: &Response) -> bool {
        true
    }

    /// The run succeeded with the payload of its last executed command
    fn on_result(self, payload: Bytes);

    /// The run failed
    fn on_exception(self, error: PipelineError);
}

impl<F> ResultCallback for F
where
    F: FnOnce(Result<Bytes, PipelineError>) + Send + 'static,
{
    fn on_result(self, payload: Bytes) {
        self(Ok(payload))
    }

    fn on_exception(self, error: PipelineError) {
        self(Err(error))
    }
}

/// Callback forwarding the outcome to a channel, with a continuation policy
pub(crate) struct WaitCallback<P> {
    pub(crate) sender: Sender<Result<Bytes, PipelineError>>,
    pub(crate) policy: P,
}

impl<P> ResultCallback for WaitCallback<P>
where
    P: FnMut(&Response) -> bool + Send + 'static,
{
    fn should_continue(&mut self, intermediate: &Response) -> bool {
        (self.policy)(intermediate)
    }

    fn on_result(self, payload: Bytes) {
        // the waiter may have given up
        let _ = self.sender.send(Ok(payload));
    }

    fn on_exception(self, error: PipelineError) {
        let _ = self.sender.send(Err(error));
    }
}

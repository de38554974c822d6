//! Command execution over an open channel

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use nexum_apdu_core::{Command, Response, StatusWord};
use tracing::{debug, trace, warn};

use crate::config::SenderConfig;
use crate::error::PipelineError;
use crate::lifecycle::{ChannelLifecycle, OpenChannel};
use crate::reassembler::ResponseReassembler;
use crate::request::{RequestBuilder, RequestProvider};
use crate::transport::{LogicalChannelTransport, guarded};

/// Builds a request and runs its commands in order on one channel
#[derive(Debug)]
pub struct CommandPipeline {
    transport: Arc<dyn LogicalChannelTransport>,
    reassembler: ResponseReassembler,
    channel_closed_status: Option<StatusWord>,
    extended_apdu: bool,
}

impl CommandPipeline {
    /// Create a pipeline over `transport`
    pub fn new(transport: Arc<dyn LogicalChannelTransport>, config: &SenderConfig) -> Self {
        Self {
            transport,
            reassembler: ResponseReassembler::new(config.max_get_response_rounds),
            channel_closed_status: config.channel_closed_status,
            extended_apdu: config.extended_apdu,
        }
    }

    /// Build the request for `channel` and run it
    ///
    /// Returns the complete response of the last executed command. Execution
    /// stops at the first error status or when `should_continue` declines an
    /// intermediate response. A status equal to the channel-closed status
    /// invalidates the channel in `lifecycle`.
    pub fn run<P, F>(
        &self,
        lifecycle: &ChannelLifecycle,
        channel: &OpenChannel,
        provider: P,
        mut should_continue: F,
    ) -> Result<Response, PipelineError>
    where
        P: RequestProvider,
        F: FnMut(&Response) -> bool,
    {
        let commands = self.build(channel, provider)?;
        let total = commands.len();
        let mut commands = commands.into_iter().enumerate().peekable();

        while let Some((index, command)) = commands.next() {
            let command = command.on_channel(channel.handle);
            let response = self.execute(&command)?;

            if !response.is_success() {
                let status = response.status();
                warn!(
                    channel = %channel.handle,
                    index,
                    %status,
                    reason = status.description(),
                    "APDU response is not successful"
                );
                if self.channel_closed_status == Some(status) {
                    lifecycle.invalidate();
                }
                return Err(PipelineError::TransmitFailed { status });
            }

            if commands.peek().is_none() {
                return Ok(response);
            }
            if !should_continue(&response) {
                debug!(index, total, "Stopping after intermediate response");
                return Ok(response);
            }
        }

        Err(PipelineError::builder("Request contains no commands"))
    }

    fn build<P: RequestProvider>(
        &self,
        channel: &OpenChannel,
        provider: P,
    ) -> Result<Vec<Command>, PipelineError> {
        let mut builder = RequestBuilder::new(channel.handle, self.extended_apdu);
        let select_response = &channel.select_response;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            provider.build_request(select_response, &mut builder)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Request provider failed");
                return Err(PipelineError::BuilderFailed(e));
            }
            Err(_) => {
                warn!("Request provider panicked");
                return Err(PipelineError::builder("Request provider panicked"));
            }
        }

        if builder.is_empty() {
            warn!("Request provider produced no commands");
            return Err(PipelineError::builder("Request contains no commands"));
        }
        trace!(commands = builder.len(), "Built request");
        Ok(builder.into_commands())
    }

    fn execute(&self, command: &Command) -> Result<Response, PipelineError> {
        let transmit = |command: &Command| {
            guarded("transmit", || self.transport.transmit(command)).map_err(|e| {
                warn!(error = %e, "Transport failed to transmit command");
                PipelineError::transport_failure()
            })
        };
        let first = transmit(command)?;
        self.reassembler.read_full(command.channel(), first, transmit)
    }
}

//! Request building
//!
//! A [`RequestProvider`] turns the applet's SELECT response into the list
//! of commands to run. Every command it adds is addressed to the channel the
//! pipeline opened, whatever channel it was built for.

use bytes::Bytes;
use nexum_apdu_core::command::{MAX_EXTENDED_DATA_LEN, MAX_SHORT_DATA_LEN};
use nexum_apdu_core::{ChannelHandle, Command, ExpectedLength};

/// Error returned by a request provider
pub type BuildError = Box<dyn std::error::Error + Send + Sync>;

/// STORE DATA class byte (GlobalPlatform)
pub const CLA_STORE_DATA: u8 = 0x80;
/// STORE DATA instruction
pub const INS_STORE_DATA: u8 = 0xE2;
/// P1 of a STORE DATA block followed by more blocks
pub const P1_STORE_DATA_INTERM: u8 = 0x11;
/// P1 of the last STORE DATA block
pub const P1_STORE_DATA_END: u8 = 0x91;

/// Produces the commands of one pipeline run
pub trait RequestProvider: Send {
    /// Add commands to `builder`, given the applet's SELECT response
    fn build_request(
        self,
        select_response: &[u8],
        builder: &mut RequestBuilder,
    ) -> Result<(), BuildError>;
}

impl<F> RequestProvider for F
where
    F: FnOnce(&[u8], &mut RequestBuilder) -> Result<(), BuildError> + Send,
{
    fn build_request(
        self,
        select_response: &[u8],
        builder: &mut RequestBuilder,
    ) -> Result<(), BuildError> {
        self(select_response, builder)
    }
}

/// Ordered list of commands bound to one logical channel
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    channel: ChannelHandle,
    extended_apdu: bool,
    commands: Vec<Command>,
}

impl RequestBuilder {
    /// Create an empty request for `channel`
    pub const fn new(channel: ChannelHandle, extended_apdu: bool) -> Self {
        Self {
            channel,
            extended_apdu,
            commands: Vec::new(),
        }
    }

    /// Channel every command is sent on
    pub const fn channel(&self) -> ChannelHandle {
        self.channel
    }

    /// Add a prebuilt command, readdressed to the request's channel
    pub fn add_command(&mut self, command: Command) -> &mut Self {
        self.commands.push(command.on_channel(self.channel));
        self
    }

    /// Add a header-only command
    pub fn add_apdu(&mut self, cla: u8, ins: u8, p1: u8, p2: u8) -> &mut Self {
        self.add_command(Command::new(cla, ins, p1, p2))
    }

    /// Add a command with a data field
    pub fn add_apdu_with_data(
        &mut self,
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: impl Into<Bytes>,
    ) -> &mut Self {
        self.add_command(Command::new_with_data(cla, ins, p1, p2, data))
    }

    /// Add a command with an expected length
    pub fn add_apdu_with_le(
        &mut self,
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        le: ExpectedLength,
    ) -> &mut Self {
        self.add_command(Command::new(cla, ins, p1, p2).with_le(le))
    }

    /// Add GlobalPlatform STORE DATA commands carrying `data`
    ///
    /// Data is split into blocks of at most 255 bytes numbered from 0 in P2
    /// (modulo 256). P1 marks every block but the last as intermediate. With
    /// extended APDUs enabled, data up to 65535 bytes goes in one command.
    pub fn add_store_data(&mut self, data: impl Into<Bytes>) -> &mut Self {
        let data: Bytes = data.into();

        if self.extended_apdu && data.len() <= MAX_EXTENDED_DATA_LEN {
            return self.add_apdu_with_data(
                CLA_STORE_DATA,
                INS_STORE_DATA,
                P1_STORE_DATA_END,
                0x00,
                data,
            );
        }

        let blocks = data.len().div_ceil(MAX_SHORT_DATA_LEN).max(1);
        for block in 0..blocks {
            let start = block * MAX_SHORT_DATA_LEN;
            let end = (start + MAX_SHORT_DATA_LEN).min(data.len());
            let p1 = if block + 1 == blocks {
                P1_STORE_DATA_END
            } else {
                P1_STORE_DATA_INTERM
            };
            self.add_apdu_with_data(
                CLA_STORE_DATA,
                INS_STORE_DATA,
                p1,
                block as u8,
                data.slice(start..end),
            );
        }
        self
    }

    /// Commands added so far
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether no command was added
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Take the commands
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_are_stamped_with_channel() {
        let mut builder = RequestBuilder::new(ChannelHandle::new(2), false);
        builder
            .add_apdu(0x80, 0xCA, 0x00, 0x5A)
            .add_command(Command::new(0x00, 0xB0, 0x00, 0x00).on_channel(ChannelHandle::new(7)))
            .add_apdu_with_le(0x00, 0xB0, 0x00, 0x00, 0x10);

        assert_eq!(builder.len(), 3);
        assert!(
            builder
                .commands()
                .iter()
                .all(|c| c.channel() == ChannelHandle::new(2))
        );
        assert_eq!(builder.commands()[0].encoded_class(), 0x82);
    }

    #[test]
    fn test_store_data_segmentation() {
        let data: Vec<u8> = (0..600).map(|i| i as u8).collect();
        let mut builder = RequestBuilder::new(ChannelHandle::new(1), false);
        builder.add_store_data(data.clone());

        let commands = builder.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands.iter().map(Command::p1).collect::<Vec<_>>(),
            vec![0x11, 0x11, 0x91]
        );
        assert_eq!(
            commands.iter().map(Command::p2).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(commands[0].data().len(), 255);
        assert_eq!(commands[2].data().len(), 90);
        assert!(commands.iter().all(|c| c.class() == 0x80 && c.instruction() == 0xE2));

        let joined: Vec<u8> = commands.iter().flat_map(|c| c.data().to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn test_store_data_single_block() {
        let mut builder = RequestBuilder::new(ChannelHandle::new(1), false);
        builder.add_store_data(vec![0xBF, 0x2D, 0x00]);
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.commands()[0].p1(), P1_STORE_DATA_END);
        assert_eq!(builder.commands()[0].p2(), 0);
    }

    #[test]
    fn test_store_data_extended() {
        let mut builder = RequestBuilder::new(ChannelHandle::new(1), true);
        builder.add_store_data(vec![0u8; 1000]);
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.commands()[0].p1(), P1_STORE_DATA_END);
        assert!(builder.commands()[0].is_extended());
    }

    #[test]
    fn test_closure_provider() {
        let provider = |select: &[u8], builder: &mut RequestBuilder| -> Result<(), BuildError> {
            if select.is_empty() {
                return Err("empty select response".into());
            }
            builder.add_apdu(0x80, 0xE2, 0x91, 0x00);
            Ok(())
        };

        let mut builder = RequestBuilder::new(ChannelHandle::new(1), false);
        provider.build_request(&[0x6F], &mut builder).unwrap();
        assert_eq!(builder.len(), 1);
    }
}

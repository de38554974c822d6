//! Drive an applet on a simulated card through an `ApduSender`
//!
//! Run with `RUST_LOG=debug cargo run --example simulated_card`.

use std::error::Error;
use std::sync::Arc;

use nexum_apdu_channel::{
    ApduSender, BuildError, FileStore, ManagedChannelTransport, RequestBuilder, SessionManager,
};
use nexum_apdu_core::command::decode_class;
use nexum_apdu_core::{Aid, Bytes, CardTransport, Error as ApduError};
use tracing::info;

/// Card with a single applet that counts STORE DATA bytes
#[derive(Debug)]
struct SimulatedCard {
    aid: Vec<u8>,
    open_channels: [bool; 4],
    selected: [bool; 4],
    stored: usize,
    pending: Vec<u8>,
}

impl SimulatedCard {
    fn new(aid: &Aid) -> Self {
        Self {
            aid: aid.as_bytes().to_vec(),
            open_channels: [true, false, false, false],
            selected: [false; 4],
            stored: 0,
            pending: Vec::new(),
        }
    }

    /// Return at most 8 bytes at a time to exercise GET RESPONSE
    fn respond(&mut self, payload: Vec<u8>) -> Vec<u8> {
        self.pending = payload;
        self.next_chunk()
    }

    fn next_chunk(&mut self) -> Vec<u8> {
        let take = self.pending.len().min(8);
        let mut out: Vec<u8> = self.pending.drain(..take).collect();
        match self.pending.len() {
            0 => out.extend_from_slice(&[0x90, 0x00]),
            n => out.extend_from_slice(&[0x61, n.min(0xFF) as u8]),
        }
        out
    }
}

impl CardTransport for SimulatedCard {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, ApduError> {
        if command.len() < 4 {
            return Err(ApduError::InvalidCommandLength(command.len()));
        }
        let (_, channel) = decode_class(command[0]);
        let channel = usize::from(channel);
        let (ins, p1, p2) = (command[1], command[2], command[3]);
        let data = if command.len() > 5 {
            &command[5..5 + usize::from(command[4])]
        } else {
            &[][..]
        };

        if channel >= self.open_channels.len() || !self.open_channels[channel] {
            return Ok(Bytes::from_static(&[0x68, 0x81]));
        }

        let response = match (ins, p1) {
            (0x70, 0x00) => match self.open_channels.iter().position(|open| !open) {
                Some(free) => {
                    self.open_channels[free] = true;
                    vec![free as u8, 0x90, 0x00]
                }
                None => vec![0x6A, 0x81],
            },
            (0x70, 0x80) => {
                let target = usize::from(p2);
                if target > 0 && target < self.open_channels.len() {
                    self.open_channels[target] = false;
                    self.selected[target] = false;
                }
                vec![0x90, 0x00]
            }
            (0xA4, 0x04) if data == self.aid.as_slice() => {
                self.selected[channel] = true;
                let mut fci = vec![0x6F, (self.aid.len() + 2) as u8, 0x84, self.aid.len() as u8];
                fci.extend_from_slice(&self.aid);
                self.respond(fci)
            }
            (0xA4, _) => vec![0x6A, 0x82],
            (0xC0, _) => self.next_chunk(),
            (0xE2, _) if self.selected[channel] => {
                self.stored += data.len();
                let mut out = (self.stored as u32).to_be_bytes().to_vec();
                out.extend_from_slice(&[0x90, 0x00]);
                out
            }
            _ => vec![0x6D, 0x00],
        };
        Ok(Bytes::from(response))
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let aid = Aid::from_hex("A0000005591010FFFFFFFF8900000100")?;
    let transport = Arc::new(ManagedChannelTransport::new(SimulatedCard::new(&aid)));

    let state_dir = tempfile::tempdir()?;
    let store = Arc::new(FileStore::open(state_dir.path().join("channels.json"))?);
    let sessions = Arc::new(SessionManager::new());

    let sender = ApduSender::builder(aid, transport)
        .store(store)
        .session_tracker(sessions.clone())
        .build()?;

    // nothing was left open by a previous run, but this is where it would be closed
    sender.close_any_open_channel();

    sessions.start_session("provisioning");
    for chunk in [vec![0xAA; 300], vec![0xBB; 20]] {
        let total = sender.send_and_wait(move |select: &[u8], request: &mut RequestBuilder| {
            info!(select = %hex::encode(select), "Applet selected");
            request.add_store_data(chunk);
            Ok::<_, BuildError>(())
        })?;
        info!(stored = %hex::encode(&total), open = sender.is_channel_open(), "STORE DATA done");
    }
    sessions.end_session("provisioning");

    info!(open = sender.is_channel_open(), "Session ended");
    Ok(())
}

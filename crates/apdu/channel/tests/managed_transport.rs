//! Tests for ManagedChannelTransport over a scripted card

mod common;

use std::collections::VecDeque;
use std::sync::Arc;

use nexum_apdu_channel::{
    ApduSender, BuildError, LogicalChannelTransport, ManagedChannelTransport, OpenChannelStatus,
    RequestBuilder,
};
use nexum_apdu_core::{Bytes, CardTransport, ChannelHandle, Command, Error};

/// Card answering a fixed script of (command, response) hex pairs
#[derive(Debug)]
struct ScriptedCard {
    script: VecDeque<(String, String)>,
    received: Vec<String>,
}

impl ScriptedCard {
    fn new(script: &[(&str, &str)]) -> Self {
        Self {
            script: script
                .iter()
                .map(|(command, response)| (command.to_uppercase(), response.to_uppercase()))
                .collect(),
            received: Vec::new(),
        }
    }
}

impl CardTransport for ScriptedCard {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        let sent = hex::encode_upper(command);
        self.received.push(sent.clone());
        match self.script.pop_front() {
            Some((expected, response)) if expected == sent => {
                Ok(Bytes::from(hex::decode(response).unwrap()))
            }
            Some((expected, _)) => Err(Error::message(format!(
                "expected {expected}, card received {sent}"
            ))),
            None => Err(Error::message(format!("unscripted command {sent}"))),
        }
    }
}

const AID: &str = "A0000005591010FFFFFFFF8900000100";

#[test]
fn test_open_selects_applet_and_follows_continuation() {
    let select = format!("02A4040010{AID}00");
    let card = ScriptedCard::new(&[
        ("0070000001", "029000"),
        (select.as_str(), "6104"),
        ("02C0000004", "6F0284019000"),
        ("82E2910003BF2D00", "9000"),
        ("00708002", "9000"),
    ]);
    let transport = ManagedChannelTransport::new(card);

    let opened = transport
        .open_logical_channel(&common::test_aid())
        .unwrap();
    assert_eq!(opened.status, OpenChannelStatus::NoError);
    assert_eq!(opened.channel, ChannelHandle::new(2));
    assert_eq!(opened.select_response.as_ref(), &[0x6F, 0x02, 0x84, 0x01]);

    let command = Command::new_with_data(0x80, 0xE2, 0x91, 0x00, vec![0xBF, 0x2D, 0x00])
        .on_channel(opened.channel);
    assert!(transport.transmit(&command).unwrap().is_success());

    assert!(transport.close_logical_channel(opened.channel).unwrap());
    assert!(transport.into_inner().script.is_empty());
}

#[test]
fn test_no_free_channel_is_missing_resource() {
    let transport = ManagedChannelTransport::new(ScriptedCard::new(&[("0070000001", "6A81")]));
    let opened = transport
        .open_logical_channel(&common::test_aid())
        .unwrap();
    assert_eq!(opened.status, OpenChannelStatus::MissingResource);
    assert!(!opened.channel.is_valid());
}

#[test]
fn test_unknown_applet_closes_channel() {
    let select = format!("01A4040010{AID}00");
    let card = ScriptedCard::new(&[
        ("0070000001", "019000"),
        (select.as_str(), "6A82"),
        ("00708001", "9000"),
    ]);
    let transport = ManagedChannelTransport::new(card);

    let opened = transport
        .open_logical_channel(&common::test_aid())
        .unwrap();
    assert_eq!(opened.status, OpenChannelStatus::NoSuchElement);
    assert!(transport.into_inner().script.is_empty());
}

#[test]
fn test_select_transport_error_closes_channel() {
    let transport = ManagedChannelTransport::new(ScriptedCard::new(&[("0070000001", "039000")]));

    assert!(transport.open_logical_channel(&common::test_aid()).is_err());

    let card = transport.into_inner();
    assert_eq!(
        card.received,
        vec![
            "0070000001".to_owned(),
            format!("03A4040010{AID}00"),
            "00708003".to_owned(),
        ]
    );
}

#[test]
fn test_basic_channel_is_never_closed() {
    let transport = ManagedChannelTransport::new(ScriptedCard::new(&[]));
    assert!(!transport.close_logical_channel(ChannelHandle::BASIC).unwrap());
}

#[test]
fn test_oversized_command_is_rejected_before_sending() {
    let transport = ManagedChannelTransport::new(ScriptedCard::new(&[]));
    let command = Command::new_with_data(0x80, 0xE2, 0x91, 0x00, vec![0u8; 70_000])
        .on_channel(ChannelHandle::new(1));
    assert!(matches!(
        transport.transmit(&command),
        Err(Error::DataTooLong(70_000, _))
    ));
}

#[test]
fn test_sender_over_managed_transport() {
    common::init_tracing();
    let select = format!("01A4040010{AID}00");
    let card = ScriptedCard::new(&[
        ("0070000001", "019000"),
        (select.as_str(), "6F009000"),
        ("81E211000100", "9000"),
        ("81E291010101", "BF2D009000"),
        ("00708001", "9000"),
    ]);
    let transport = Arc::new(ManagedChannelTransport::new(card));
    let sender = ApduSender::builder(common::test_aid(), transport).build().unwrap();

    let payload = sender
        .send_and_wait(|select: &[u8], request: &mut RequestBuilder| -> Result<(), BuildError> {
            assert_eq!(select, &[0x6F, 0x00]);
            request.add_apdu_with_data(0x80, 0xE2, 0x11, 0x00, vec![0x00]);
            request.add_apdu_with_data(0x80, 0xE2, 0x91, 0x01, vec![0x01]);
            Ok(())
        })
        .unwrap();

    assert_eq!(payload.as_ref(), &[0xBF, 0x2D, 0x00]);
    assert!(!sender.is_channel_open());
}

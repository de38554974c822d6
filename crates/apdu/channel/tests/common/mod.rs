//! Common test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use nexum_apdu_channel::{
    ApduSender, BuildError, ChannelRegistry, KeyValueStore, LogicalChannelTransport,
    OpenChannelResponse, RequestBuilder, RequestProvider, SessionTracker,
};
use nexum_apdu_core::{Aid, Bytes, ChannelHandle, Command, Error, Response};
use parking_lot::Mutex;

/// Select response returned by [`FakeTransport`] unless scripted otherwise
pub const SELECT_RESPONSE: &[u8] = &[0x6F, 0x03, 0x84, 0x01, 0xA0];

/// Something the fake transport was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open,
    Close(ChannelHandle),
    Transmit(Command),
}

#[derive(Debug, Default)]
struct FakeState {
    opens: VecDeque<OpenChannelResponse>,
    responses: VecDeque<Result<Response, Error>>,
    events: Vec<Event>,
}

/// Scripted [`LogicalChannelTransport`]
///
/// Opens succeed on channel 1 and commands answer `90 00` echoing their
/// data, unless results were queued with the `push_*` methods.
#[derive(Debug, Default)]
pub struct FakeTransport {
    state: Mutex<FakeState>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    panic_next_transmit: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport that sleeps `delay` inside every transmit
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn push_open(&self, response: OpenChannelResponse) {
        self.state.lock().opens.push_back(response);
    }

    pub fn push_response(&self, response: Response) {
        self.state.lock().responses.push_back(Ok(response));
    }

    pub fn push_error(&self, error: Error) {
        self.state.lock().responses.push_back(Err(error));
    }

    /// Make the next transmit panic, as a card removed mid-exchange might
    pub fn panic_next_transmit(&self) {
        self.panic_next_transmit.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn opens(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Open))
            .count()
    }

    pub fn closes(&self) -> Vec<ChannelHandle> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Close(handle) => Some(handle),
                _ => None,
            })
            .collect()
    }

    pub fn transmitted(&self) -> Vec<Command> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Transmit(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Highest number of transmits observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl LogicalChannelTransport for FakeTransport {
    fn open_logical_channel(&self, _aid: &Aid) -> Result<OpenChannelResponse, Error> {
        let mut state = self.state.lock();
        state.events.push(Event::Open);
        Ok(state.opens.pop_front().unwrap_or_else(|| {
            OpenChannelResponse::success(ChannelHandle::new(1), Bytes::from_static(SELECT_RESPONSE))
        }))
    }

    fn close_logical_channel(&self, channel: ChannelHandle) -> Result<bool, Error> {
        self.state.lock().events.push(Event::Close(channel));
        Ok(true)
    }

    fn transmit(&self, command: &Command) -> Result<Response, Error> {
        if self.panic_next_transmit.swap(false, Ordering::SeqCst) {
            panic!("card removed during transmit");
        }
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let result = {
            let mut state = self.state.lock();
            state.events.push(Event::Transmit(command.clone()));
            state
                .responses
                .pop_front()
                .unwrap_or_else(|| Ok(Response::success(command.data().to_vec())))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// AID used by the tests
pub fn test_aid() -> Aid {
    Aid::from_hex("A0000005591010FFFFFFFF8900000100").unwrap()
}

/// Sender with default collaborators
pub fn sender(transport: &Arc<FakeTransport>) -> ApduSender {
    ApduSender::builder(test_aid(), transport.clone()).build().unwrap()
}

/// Sender with explicit collaborators
pub fn sender_with(
    transport: &Arc<FakeTransport>,
    registry: &Arc<ChannelRegistry>,
    store: Arc<dyn KeyValueStore>,
    session: Arc<dyn SessionTracker>,
) -> ApduSender {
    ApduSender::builder(test_aid(), transport.clone())
        .registry(registry.clone())
        .store(store)
        .session_tracker(session)
        .build()
        .unwrap()
}

/// Provider adding `commands` as they are
pub fn commands(commands: Vec<Command>) -> impl RequestProvider + 'static {
    move |_: &[u8], request: &mut RequestBuilder| -> Result<(), BuildError> {
        for command in commands {
            request.add_command(command);
        }
        Ok(())
    }
}

/// Provider sending `count` commands tagged with `tag`
pub fn tagged(tag: u8, count: u8) -> impl RequestProvider + 'static {
    commands(
        (0..count)
            .map(|i| Command::new_with_data(0x80, 0xE2, 0x91, i, vec![tag, i]))
            .collect(),
    )
}

/// Install a test subscriber, ignoring repeated calls
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

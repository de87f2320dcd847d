//! Flows linking a GridConnect text hub and a binary CAN hub.
//!
//! The adapter is a port on both hubs. Text arriving on the text side is
//! parsed and injected into the CAN hub tagged with the adapter's CAN-side
//! port, and CAN frames are rendered and injected into the text hub tagged
//! with the adapter's text-side port. Neither direction therefore sees its
//! own output again. Malformed text is dropped here and never reaches the
//! CAN hub.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hub::Hub;
use transport::PortId;
use transport_fabric::{Action, Flow, FlowContext, FlowOptions, Service, StateFlow};

use crate::format::render_into;
use crate::frame::CanFrame;
use crate::parser::GcStreamParser;

/// Conversion counters of a [`GcAdapter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdapterStats {
    pub parsed: u64,
    pub rendered: u64,
    pub parse_errors: u64,
}

#[derive(Default)]
struct AdapterCounters {
    parsed: AtomicU64,
    rendered: AtomicU64,
    parse_errors: AtomicU64,
}

impl AdapterCounters {
    fn snapshot(&self) -> AdapterStats {
        AdapterStats {
            parsed: self.parsed.load(Ordering::Relaxed),
            rendered: self.rendered.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
enum ParseState {
    SendFrames,
}

/// Text to CAN.
struct ParseFlow {
    parser: GcStreamParser,
    pending: VecDeque<CanFrame>,
    can_hub: Hub<CanFrame>,
    tag: PortId,
    counters: Arc<AdapterCounters>,
}

impl ParseFlow {
    fn send_frames(&mut self, ctx: &mut FlowContext<'_, Vec<u8>>) -> Action<ParseState> {
        while let Some(frame) = self.pending.front().copied() {
            let Some(mut buffer) = self.can_hub.alloc_or_wait(&ctx.notifier()) else {
                tracing::warn!(hub = %self.can_hub.name(), "CAN pool exhausted, parse flow waiting");
                return Action::WaitAndCall(ParseState::SendFrames);
            };
            if let Some(slot) = buffer.get_mut() {
                *slot = frame;
            }
            self.pending.pop_front();
            self.can_hub.send_from(self.tag, buffer);
        }
        Action::ReleaseAndExit
    }
}

impl StateFlow for ParseFlow {
    type Message = Vec<u8>;
    type State = ParseState;

    fn entry(&mut self, ctx: &mut FlowContext<'_, Vec<u8>>) -> Action<ParseState> {
        if let Some(text) = ctx.take_message() {
            let pending = &mut self.pending;
            let counters = &self.counters;
            self.parser.feed(&text, |parsed, raw| match parsed {
                Ok(frame) => {
                    counters.parsed.fetch_add(1, Ordering::Relaxed);
                    pending.push_back(frame);
                }
                Err(err) => {
                    counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        frame = %String::from_utf8_lossy(raw),
                        error = %err,
                        "dropping malformed gridconnect frame"
                    );
                }
            });
        }
        self.send_frames(ctx)
    }

    fn resume(&mut self, state: ParseState, ctx: &mut FlowContext<'_, Vec<u8>>) -> Action<ParseState> {
        match state {
            ParseState::SendFrames => self.send_frames(ctx),
        }
    }
}

#[derive(Debug)]
enum FormatState {
    Render,
}

/// CAN to text.
struct FormatFlow {
    text_hub: Hub<Vec<u8>>,
    tag: PortId,
    double_bytes: bool,
    counters: Arc<AdapterCounters>,
}

impl FormatFlow {
    fn render(&mut self, ctx: &mut FlowContext<'_, CanFrame>) -> Action<FormatState> {
        let Some(frame) = ctx.message().map(|buffer| **buffer) else {
            return Action::ReleaseAndExit;
        };
        let Some(mut text) = self.text_hub.alloc_or_wait(&ctx.notifier()) else {
            tracing::warn!(hub = %self.text_hub.name(), "text pool exhausted, format flow waiting");
            return Action::WaitAndCall(FormatState::Render);
        };
        if let Some(out) = text.get_mut() {
            render_into(&frame, self.double_bytes, out);
        }
        self.counters.rendered.fetch_add(1, Ordering::Relaxed);
        self.text_hub.send_from(self.tag, text);
        Action::ReleaseAndExit
    }
}

impl StateFlow for FormatFlow {
    type Message = CanFrame;
    type State = FormatState;

    fn entry(&mut self, ctx: &mut FlowContext<'_, CanFrame>) -> Action<FormatState> {
        self.render(ctx)
    }

    fn resume(&mut self, state: FormatState, ctx: &mut FlowContext<'_, CanFrame>) -> Action<FormatState> {
        match state {
            FormatState::Render => self.render(ctx),
        }
    }
}

/// Bidirectional GridConnect ⇄ CAN link between two hubs.
pub struct GcAdapter {
    parse: Flow<ParseFlow>,
    format: Flow<FormatFlow>,
    read_hub: Hub<Vec<u8>>,
    can_hub: Hub<CanFrame>,
    counters: Arc<AdapterCounters>,
}

impl GcAdapter {
    /// Links `text_hub` and `can_hub`. With `double_bytes` every rendered
    /// character is emitted twice.
    pub fn new(
        service: &Service,
        text_hub: &Hub<Vec<u8>>,
        can_hub: &Hub<CanFrame>,
        double_bytes: bool,
    ) -> Self {
        Self::split(service, text_hub, text_hub, can_hub, double_bytes)
    }

    /// Like [`GcAdapter::new`] but parses from `read_hub` and renders into
    /// `write_hub`.
    pub fn split(
        service: &Service,
        read_hub: &Hub<Vec<u8>>,
        write_hub: &Hub<Vec<u8>>,
        can_hub: &Hub<CanFrame>,
        double_bytes: bool,
    ) -> Self {
        let text_port = PortId::next();
        let can_port = PortId::next();
        let counters = Arc::new(AdapterCounters::default());

        let parse = Flow::new(
            service,
            ParseFlow {
                parser: GcStreamParser::new(),
                pending: VecDeque::new(),
                can_hub: can_hub.clone(),
                tag: can_port,
                counters: Arc::clone(&counters),
            },
            FlowOptions {
                id: Some(text_port),
                ..FlowOptions::named(format!("{}:parse", read_hub.name()))
            },
        );
        let format = Flow::new(
            service,
            FormatFlow {
                text_hub: write_hub.clone(),
                tag: text_port,
                double_bytes,
                counters: Arc::clone(&counters),
            },
            FlowOptions {
                id: Some(can_port),
                ..FlowOptions::named(format!("{}:format", write_hub.name()))
            },
        );

        read_hub.register_port(&parse.sink());
        can_hub.register_port(&format.sink());
        tracing::debug!(
            text = %read_hub.name(),
            can = %can_hub.name(),
            double_bytes,
            "gridconnect adapter linked"
        );

        Self {
            parse,
            format,
            read_hub: read_hub.clone(),
            can_hub: can_hub.clone(),
            counters,
        }
    }

    /// Port through which the adapter receives text.
    pub fn text_port(&self) -> PortId {
        self.parse.id()
    }

    /// Port through which the adapter receives CAN frames.
    pub fn can_port(&self) -> PortId {
        self.format.id()
    }

    pub fn stats(&self) -> AdapterStats {
        self.counters.snapshot()
    }

    /// Unregisters both ports. Returns whether either was still linked, so
    /// only the first call reports `true`.
    pub fn shutdown(&self) -> bool {
        let text = self.read_hub.unregister_port(self.parse.id());
        let can = self.can_hub.unregister_port(self.format.id());
        let unlinked = text || can;
        if unlinked {
            tracing::debug!(text = %self.read_hub.name(), "gridconnect adapter unlinked");
        }
        unlinked
    }
}

impl Drop for GcAdapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct PrintFlow {
    out: Box<dyn Write + Send>,
    line: Vec<u8>,
}

impl StateFlow for PrintFlow {
    type Message = CanFrame;
    type State = ();

    fn entry(&mut self, ctx: &mut FlowContext<'_, CanFrame>) -> Action<()> {
        if let Some(frame) = ctx.message() {
            self.line.clear();
            render_into(frame, false, &mut self.line);
            self.line.push(b'\n');
            if let Err(err) = self.out.write_all(&self.line) {
                tracing::warn!(error = %err, "packet printer write failed");
            }
        }
        Action::ReleaseAndExit
    }

    fn resume(&mut self, _: (), _ctx: &mut FlowContext<'_, CanFrame>) -> Action<()> {
        Action::ReleaseAndExit
    }
}

/// Port on a CAN hub that writes every frame as a GridConnect line.
pub struct GcPacketPrinter {
    flow: Flow<PrintFlow>,
    can_hub: Hub<CanFrame>,
}

impl GcPacketPrinter {
    pub fn new(service: &Service, can_hub: &Hub<CanFrame>, out: Box<dyn Write + Send>) -> Self {
        let flow = Flow::new(
            service,
            PrintFlow {
                out,
                line: Vec::new(),
            },
            FlowOptions::named(format!("{}:printer", can_hub.name())),
        );
        can_hub.register_port(&flow.sink());
        Self {
            flow,
            can_hub: can_hub.clone(),
        }
    }

    /// Prints to standard output.
    pub fn stdout(service: &Service, can_hub: &Hub<CanFrame>) -> Self {
        Self::new(service, can_hub, Box::new(std::io::stdout()))
    }
}

impl Drop for GcPacketPrinter {
    fn drop(&mut self) {
        self.can_hub.unregister_port(self.flow.id());
    }
}

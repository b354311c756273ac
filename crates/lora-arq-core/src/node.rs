use lora_arq_abstract::{
    ArqConfig, ConfigError, EventKind, NodeId, Received, Role, SendReport, SystemContext,
};
use tracing::info;

use crate::dispatcher::{Awaiting, Dispatch, Dispatcher};
use crate::event_log::{EventDetail, EventLog};
use crate::session::{Inbound, SendError, Session};

/// One ARQ endpoint: a sender session and a receiver dispatcher sharing an event log.
///
/// The node never owns its host. Every call borrows a [`SystemContext`], so
/// the same node runs under the simulator and on a real radio.
#[derive(Debug)]
pub struct ArqNode {
    id: NodeId,
    config: ArqConfig,
    session: Session,
    dispatcher: Dispatcher,
    log: EventLog,
}

impl ArqNode {
    pub fn new(id: NodeId, config: ArqConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            session: Session::new(id.clone(), config.clone()),
            dispatcher: Dispatcher::new(id.clone(), config.max_fragments),
            log: EventLog::new(id.clone()),
            id,
            config,
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn config(&self) -> &ArqConfig {
        &self.config
    }

    /// Mark the session start used for goodput.
    pub fn start(&mut self, ctx: &mut dyn SystemContext) {
        self.session.mark_start(ctx.now());
        self.log
            .record(ctx, Role::Tx, EventKind::SessionStart, EventDetail::default());
        info!("node {} up", self.id);
    }

    /// Reliable send; broadcast when `dst` is `None`.
    pub fn send_message(
        &mut self,
        ctx: &mut dyn SystemContext,
        text: &[u8],
        dst: Option<NodeId>,
    ) -> Result<SendReport, SendError> {
        let mut inbound = Inbound {
            dispatcher: &mut self.dispatcher,
            log: &mut self.log,
        };
        self.session.send_message(ctx, &mut inbound, text, dst)
    }

    /// Idle-loop step: drain the radio. Returns the number of datagrams handled.
    pub fn poll(&mut self, ctx: &mut dyn SystemContext) -> usize {
        let mut handled = 0;
        while let Some(received) = ctx.try_receive() {
            self.handle_frame(ctx, received);
            handled += 1;
        }
        handled
    }

    /// Dispatch one datagram while no send is in progress.
    pub fn handle_frame(&mut self, ctx: &mut dyn SystemContext, received: Received) -> Dispatch {
        self.dispatcher
            .dispatch(ctx, &mut self.log, received, Awaiting::Nothing)
    }

    pub fn next_seq(&self) -> u32 {
        self.session.next_seq()
    }

    /// `(bytes, packets)` of fresh data received.
    pub fn rx_totals(&self) -> (u64, u64) {
        self.dispatcher.rx_totals()
    }

    /// `(packets, bytes)` of data transmissions.
    pub fn tx_totals(&self) -> (u64, u64) {
        self.session.tx_totals()
    }
}

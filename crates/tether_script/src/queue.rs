//! Cross-thread dispatch queue
//!
//! The only path by which a non-owning thread causes code to run inside
//! the script engine. Producers enqueue without blocking; the engine
//! drains one message at a time on its own thread. Slot releases travel
//! through the same queue so a registration can never be deleted while a
//! record targeting it is still in flight.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::ThreadId;

use tether_core::{Error, Function, Result, Value};

pub(crate) type SlotId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Resolve,
    Reject,
}

/// Keeps an engine-heap slot registration alive. The actual delete runs on
/// the engine thread, so the drop handler enqueues it; during shutdown the
/// send fails and the slot goes down with the engine heap.
pub(crate) struct SlotKeepAlive {
    id: SlotId,
    tx: Sender<Message>,
}

impl SlotKeepAlive {
    pub(crate) fn id(&self) -> SlotId {
        self.id
    }
}

impl Drop for SlotKeepAlive {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Release(self.id));
    }
}

/// One deferred call: the target registration (kept alive for the record's
/// lifetime), the captured arguments, and an optional reply channel that
/// receives the real converted result after execution.
pub struct InvocationRecord {
    pub(crate) target: Arc<SlotKeepAlive>,
    pub(crate) args: Vec<Value>,
    pub(crate) reply: Option<Sender<Value>>,
}

pub(crate) enum Message {
    Invoke(InvocationRecord),
    Settle {
        slot: Arc<SlotKeepAlive>,
        disposition: Disposition,
        value: Value,
    },
    Release(SlotId),
}

/// Producer half of the queue. Clonable, thread-safe, never blocks.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: Sender<Message>,
    owner: ThreadId,
    engine_id: u64,
}

impl DispatchQueue {
    pub(crate) fn new(tx: Sender<Message>, engine_id: u64) -> Self {
        Self {
            tx,
            owner: std::thread::current().id(),
            engine_id,
        }
    }

    /// Enqueue a deferred call. Fails only when the engine is gone, in
    /// which case the record's captured handles are released undelivered.
    pub fn enqueue(&self, record: InvocationRecord) -> Result<()> {
        self.send(Message::Invoke(record))
    }

    pub(crate) fn send(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::QueueClosed)
    }

    pub(crate) fn keep_alive(&self, id: SlotId) -> Arc<SlotKeepAlive> {
        Arc::new(SlotKeepAlive {
            id,
            tx: self.tx.clone(),
        })
    }

    pub(crate) fn is_owner_thread(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    pub(crate) fn engine_id(&self) -> u64 {
        self.engine_id
    }
}

pub(crate) type MessageReceiver = Receiver<Message>;

/// Script-backed function handle.
///
/// `send` never runs the script function inline. The call is captured into
/// an [`InvocationRecord`] and replayed later on the script-owning thread;
/// the returned disposition is always `Bool(true)` and says nothing about
/// the callee, so callers must not depend on a deferred call's result. Use
/// [`ScriptFunction::record`] with a reply channel when the real result is
/// needed.
pub struct ScriptFunction {
    slot: Arc<SlotKeepAlive>,
    queue: DispatchQueue,
}

impl ScriptFunction {
    pub(crate) fn new(slot: Arc<SlotKeepAlive>, queue: DispatchQueue) -> Self {
        Self { slot, queue }
    }

    /// Build a record targeting this function, for manual enqueueing via
    /// [`DispatchQueue::enqueue`].
    pub fn record(&self, args: &[Value], reply: Option<Sender<Value>>) -> InvocationRecord {
        InvocationRecord {
            target: self.slot.clone(),
            args: args.to_vec(),
            reply,
        }
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }
}

impl Function for ScriptFunction {
    fn send(&self, args: &[Value]) -> Result<Value> {
        self.queue.enqueue(self.record(args, None))?;
        // fire-and-forget: the true result is unobservable on this thread
        Ok(Value::Bool(true))
    }
}

use crate::InterruptFrame;
use crate::vectors;

/// Something that reacts to an interrupt vector.
///
/// Handlers run with interrupts disabled on the stack of whatever task was
/// interrupted. A handler may switch tasks; the frame it was given then stays
/// on the old task's stack until that task is resumed.
pub trait InterruptHandler: Sync {
    fn handle(&self, frame: &mut InterruptFrame);
}

impl<F> InterruptHandler for F
where
    F: Fn(&mut InterruptFrame) + Sync,
{
    fn handle(&self, frame: &mut InterruptFrame) {
        self(frame);
    }
}

/// The registration seam subsystems depend on instead of the IDT.
pub trait InterruptRegistry {
    /// Installs `handler` for `vector`, replacing any previous one.
    fn register_interrupt_handler(&mut self, vector: u8, handler: &'static dyn InterruptHandler);
}

/// Outcome of dispatching one interrupt.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Dispatch {
    /// A registered handler ran.
    Handled,
    /// A CPU exception arrived without a handler. This is fatal.
    UnhandledException,
    /// A hardware IRQ arrived without a handler. It still has to be acknowledged.
    UnhandledIrq,
    /// Any other vector without a handler.
    Unhandled,
}

/// Fixed vector-to-handler mapping.
pub struct HandlerTable {
    handlers: [Option<&'static dyn InterruptHandler>; 256],
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            handlers: [None; 256],
        }
    }

    /// Installs a handler and returns the one it replaced.
    pub fn register(
        &mut self,
        vector: u8,
        handler: &'static dyn InterruptHandler,
    ) -> Option<&'static dyn InterruptHandler> {
        let previous = self.handlers[usize::from(vector)].replace(handler);
        if previous.is_some() {
            log::debug!("replacing handler for vector {vector}");
        }
        previous
    }

    pub fn unregister(&mut self, vector: u8) -> Option<&'static dyn InterruptHandler> {
        self.handlers[usize::from(vector)].take()
    }

    #[must_use]
    pub fn get(&self, vector: u8) -> Option<&'static dyn InterruptHandler> {
        self.handlers[usize::from(vector)]
    }

    /// Looks up the frame's vector and runs its handler.
    ///
    /// When the table sits behind a lock, prefer copying the entry out with
    /// [`get`](Self::get) and calling [`dispatch_to`] after releasing it, since
    /// the handler may not return to this task for a while.
    pub fn dispatch(&self, frame: &mut InterruptFrame) -> Dispatch {
        dispatch_to(self.get(frame.vector()), frame)
    }
}

impl InterruptRegistry for HandlerTable {
    fn register_interrupt_handler(&mut self, vector: u8, handler: &'static dyn InterruptHandler) {
        self.register(vector, handler);
    }
}

/// Runs `handler` on `frame`, or classifies the miss.
pub fn dispatch_to(
    handler: Option<&'static dyn InterruptHandler>,
    frame: &mut InterruptFrame,
) -> Dispatch {
    let vector = frame.vector();
    if let Some(handler) = handler {
        handler.handle(frame);
        return Dispatch::Handled;
    }

    if vectors::is_exception(vector) {
        log::error!(
            "unhandled exception {vector} ({})\n{frame}",
            vectors::exception_name(vector)
        );
        Dispatch::UnhandledException
    } else if let Some(line) = vectors::irq_line(vector) {
        log::warn!("unhandled IRQ {line} (vector {vector})");
        Dispatch::UnhandledIrq
    } else {
        log::warn!("unhandled interrupt vector {vector}");
        Dispatch::Unhandled
    }
}

//! The cooperative coroutine scheduler.
//!
//! A coroutine is a suspended evaluation future. `resume` polls that future
//! exactly one step with a noop waker; the only future in the interpreter
//! that ever returns `Pending` is [`YieldFuture`], so a pending poll always
//! means "the coroutine yielded" and scheduling stays strictly LIFO. Between
//! two yield boundaries no other coroutine can run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error_types::{LuaError, LuaResult};
use crate::interpreter::{Frame, Interpreter};
use crate::value::{LuaValue, MultiValue};

/// Lifecycle of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    Suspended,
    Running,
    /// Resumed some other coroutine and is waiting for it.
    Normal,
    Dead,
}

impl CoroutineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CoroutineStatus::Suspended => "suspended",
            CoroutineStatus::Running => "running",
            CoroutineStatus::Normal => "normal",
            CoroutineStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for CoroutineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

type CoFuture = Pin<Box<dyn Future<Output = LuaResult<MultiValue>>>>;

/// A coroutine: status, parked evaluation future, transfer slot for the
/// resume/yield channels, and its own call stack for tracebacks.
pub struct LuaThread {
    status: Cell<CoroutineStatus>,
    /// The body function, consumed on first resume.
    entry: RefCell<Option<LuaValue>>,
    future: RefCell<Option<CoFuture>>,
    /// Values in flight: resume arguments inbound, yield values outbound.
    transfer: RefCell<Vec<LuaValue>>,
    yield_flag: Cell<bool>,
    pub(crate) frames: Rc<RefCell<Vec<Frame>>>,
    is_main: bool,
}

impl LuaThread {
    pub fn new(func: LuaValue) -> Rc<Self> {
        Rc::new(LuaThread {
            status: Cell::new(CoroutineStatus::Suspended),
            entry: RefCell::new(Some(func)),
            future: RefCell::new(None),
            transfer: RefCell::new(Vec::new()),
            yield_flag: Cell::new(false),
            frames: Rc::new(RefCell::new(Vec::new())),
            is_main: false,
        })
    }

    /// The main thread, always running from the interpreter's point of view
    /// unless it has transferred control to a child.
    pub(crate) fn main() -> Rc<Self> {
        Rc::new(LuaThread {
            status: Cell::new(CoroutineStatus::Running),
            entry: RefCell::new(None),
            future: RefCell::new(None),
            transfer: RefCell::new(Vec::new()),
            yield_flag: Cell::new(false),
            frames: Rc::new(RefCell::new(Vec::new())),
            is_main: true,
        })
    }

    pub fn status(&self) -> CoroutineStatus {
        self.status.get()
    }

    pub fn is_main(&self) -> bool {
        self.is_main
    }

    fn set_status(&self, status: CoroutineStatus) {
        self.status.set(status);
    }
}

/// The future created by `coroutine.yield`. Its first poll parks the yielded
/// values in the thread's transfer slot and suspends; the next poll (driven
/// by the next resume) completes with the resume arguments.
struct YieldFuture {
    co: Rc<LuaThread>,
    values: Option<Vec<LuaValue>>,
    yielded: bool,
}

impl Future for YieldFuture {
    type Output = Vec<LuaValue>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !this.yielded {
            this.yielded = true;
            *this.co.transfer.borrow_mut() = this.values.take().unwrap_or_default();
            this.co.yield_flag.set(true);
            Poll::Pending
        } else {
            Poll::Ready(std::mem::take(&mut *this.co.transfer.borrow_mut()))
        }
    }
}

impl Interpreter {
    /// The coroutine currently executing, if control is inside one.
    pub fn current_coroutine(&self) -> Option<Rc<LuaThread>> {
        self.state().thread_stack.borrow().last().cloned()
    }

    /// The active thread: the innermost running coroutine, or main.
    pub(crate) fn current_thread(&self) -> Rc<LuaThread> {
        self.current_coroutine().unwrap_or_else(|| self.state().main_thread.clone())
    }

    /// True when a yield would be legal here.
    pub fn is_yieldable(&self) -> bool {
        self.current_coroutine().is_some() && self.state().non_yieldable.get() == 0
    }

    /// Transfer control back to the resumer, delivering `values`; completes
    /// with the next resume's arguments.
    pub async fn yield_values(&self, values: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        let co = self
            .current_coroutine()
            .ok_or_else(|| LuaError::coroutine("attempt to yield from outside a coroutine"))?;
        if self.state().non_yieldable.get() > 0 {
            // Yields cannot cross a protected-call boundary.
            return Err(LuaError::coroutine("attempt to yield from outside a coroutine"));
        }
        Ok(YieldFuture { co, values: Some(values), yielded: false }.await)
    }

    /// Resume a suspended coroutine with `args`. Returns the values from the
    /// next yield (or the body's return values); an error raised inside the
    /// coroutine surfaces as `Err`.
    pub fn resume_coroutine(
        &self,
        co: &Rc<LuaThread>,
        args: Vec<LuaValue>,
    ) -> LuaResult<MultiValue> {
        match co.status() {
            CoroutineStatus::Dead => {
                return Err(LuaError::coroutine("cannot resume dead coroutine"));
            }
            CoroutineStatus::Running | CoroutineStatus::Normal => {
                return Err(LuaError::coroutine("cannot resume non-suspended coroutine"));
            }
            CoroutineStatus::Suspended => {}
        }

        if co.future.borrow().is_none() {
            let func = co
                .entry
                .borrow_mut()
                .take()
                .ok_or_else(|| LuaError::coroutine("coroutine has no body"))?;
            let interp = self.clone();
            let handle = co.clone();
            let fut: CoFuture = Box::pin(async move {
                let args = std::mem::take(&mut *handle.transfer.borrow_mut());
                interp.call_value(func, args).await
            });
            *co.future.borrow_mut() = Some(fut);
        }

        *co.transfer.borrow_mut() = args;

        let caller = self.current_thread();
        caller.set_status(CoroutineStatus::Normal);
        co.set_status(CoroutineStatus::Running);
        self.state().thread_stack.borrow_mut().push(co.clone());
        // The protected-call boundary is per coroutine: a pcall in the
        // resumer must not forbid yields inside the resumed body.
        let saved_protection = self.state().non_yieldable.replace(0);

        let mut fut = self.take_future(co);
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let poll = fut.as_mut().poll(&mut cx);

        self.state().non_yieldable.set(saved_protection);
        self.state().thread_stack.borrow_mut().pop();
        caller.set_status(CoroutineStatus::Running);

        match poll {
            Poll::Ready(Ok(values)) => {
                co.set_status(CoroutineStatus::Dead);
                Ok(values)
            }
            Poll::Ready(Err(err)) => {
                co.set_status(CoroutineStatus::Dead);
                Err(err)
            }
            Poll::Pending => {
                debug_assert!(co.yield_flag.get(), "pending resume without a yield");
                co.yield_flag.set(false);
                co.set_status(CoroutineStatus::Suspended);
                *co.future.borrow_mut() = Some(fut);
                let values = std::mem::take(&mut *co.transfer.borrow_mut());
                Ok(MultiValue::from_vec(values))
            }
        }
    }

    fn take_future(&self, co: &Rc<LuaThread>) -> CoFuture {
        co.future.borrow_mut().take().expect("coroutine future prepared above")
    }

    /// `coroutine.close`: drop a suspended coroutine's parked computation.
    pub fn close_coroutine(&self, co: &Rc<LuaThread>) -> LuaResult<()> {
        match co.status() {
            CoroutineStatus::Dead => Ok(()),
            CoroutineStatus::Suspended => {
                co.future.borrow_mut().take();
                co.entry.borrow_mut().take();
                co.set_status(CoroutineStatus::Dead);
                Ok(())
            }
            CoroutineStatus::Running | CoroutineStatus::Normal => {
                Err(LuaError::coroutine("cannot close a running coroutine"))
            }
        }
    }

    /// Bump the non-yieldable counter for the duration of a protected call.
    pub(crate) fn enter_protected(&self) {
        let n = self.state().non_yieldable.get();
        self.state().non_yieldable.set(n + 1);
    }

    pub(crate) fn leave_protected(&self) {
        let n = self.state().non_yieldable.get();
        debug_assert!(n > 0);
        self.state().non_yieldable.set(n.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(CoroutineStatus::Suspended.as_str(), "suspended");
        assert_eq!(CoroutineStatus::Dead.as_str(), "dead");
    }

    #[test]
    fn test_new_thread_is_suspended() {
        let co = LuaThread::new(LuaValue::Nil);
        assert_eq!(co.status(), CoroutineStatus::Suspended);
        assert!(!co.is_main());
    }

    #[test]
    fn test_main_thread_is_running() {
        let main = LuaThread::main();
        assert_eq!(main.status(), CoroutineStatus::Running);
        assert!(main.is_main());
    }
}

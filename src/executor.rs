use futures::{
    future::{BoxFuture, FutureExt},
    task::{waker_ref, ArcWake, Context, Poll},
};
use futures_channel::oneshot;
use queues::{IsQueue, Queue};
use std::cell::RefCell;
use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::error::TbError;
use crate::TbResult;

thread_local! {
    static READY_QUEUE: RefCell<Queue<Arc<Task>>> = RefCell::new(Queue::new());
}

pub fn schedule_task(task: Arc<Task>) {
    READY_QUEUE.with(|q| {
        // `add` only reports an error for capacity bounded queues
        let _ = q.borrow_mut().add(task);
    });
}

fn next_task() -> Option<Arc<Task>> {
    READY_QUEUE.with(|q| q.borrow_mut().remove().ok())
}

pub(crate) fn clear_ready_queue() {
    READY_QUEUE.with(|q| *q.borrow_mut() = Queue::new());
}

#[inline]
pub fn run_once() {
    while let Some(task) = next_task() {
        process_task(task);
    }
}

#[inline]
fn process_task(task: Arc<Task>) {
    if *lock(&task.state) == TaskState::Cancelled {
        // do not execute if state is cancelled, will be dropped once all references disappear
        return;
    }

    let mut fut_slot = lock(&task.future);
    let Some(mut fut) = fut_slot.take() else {
        // woken again after completion, nothing left to do
        return;
    };
    let waker = waker_ref(&task);
    let context = &mut Context::from_waker(&*waker);
    match fut.as_mut().poll(context) {
        Poll::Pending => {
            // a task cancelled from within its own poll is dropped here
            if *lock(&task.state) != TaskState::Cancelled {
                *fut_slot = Some(fut);
            }
        }
        Poll::Ready(result) => {
            *lock(&task.state) = TaskState::Done;
            if let Some(tx) = lock(&task.join_tx).take() {
                let _ = tx.send(result);
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
enum TaskState {
    Pending,
    Done,
    Cancelled,
}

pub struct Task {
    future: Mutex<Option<BoxFuture<'static, TbResult>>>,
    state: Mutex<TaskState>,
    name: String,
    join_tx: Mutex<Option<oneshot::Sender<TbResult>>>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("state", &*lock(&self.state))
            .finish()
    }
}

impl Task {
    /// Run `future` concurrently with the calling task.
    pub fn fork(future: impl Future<Output = TbResult> + Send + 'static) -> JoinHandle {
        Task::spawn_from_future(future, "forked")
    }
    pub fn spawn_from_future(
        future: impl Future<Output = TbResult> + Send + 'static,
        name: &str,
    ) -> JoinHandle {
        let (task, join_handle) = Task::new(future.boxed(), name);
        schedule_task(task);
        join_handle
    }
    fn new(fut: BoxFuture<'static, TbResult>, name: &str) -> (Arc<Self>, JoinHandle) {
        let (tx, rx) = oneshot::channel::<TbResult>();
        let task = Arc::new(Self {
            future: Mutex::new(Some(fut)),
            state: Mutex::new(TaskState::Pending),
            name: name.to_string(),
            join_tx: Mutex::new(Some(tx)),
        });
        let join_handle = JoinHandle {
            join_rx: rx,
            awaited_task: Some(task.clone()),
        };
        (task, join_handle)
    }
    pub fn cancel(&self) {
        // Executor drops the future instead of polling it. Dropping the join sender
        // resolves anyone awaiting this task with `TbError::Cancelled`.
        let mut state = lock(&self.state);
        if *state == TaskState::Done {
            return;
        }
        *state = TaskState::Cancelled;
        drop(state);
        lock(&self.join_tx).take();
        // the slot is locked while the task polls itself; process_task drops it then
        if let Ok(mut slot) = self.future.try_lock() {
            slot.take();
        }
    }
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        schedule_task(arc_self.clone());
    }
}

pub struct JoinHandle {
    awaited_task: Option<Arc<Task>>,
    join_rx: oneshot::Receiver<TbResult>,
}

impl JoinHandle {
    pub fn task(&self) -> Option<Arc<Task>> {
        self.awaited_task.clone()
    }
}

impl Future for JoinHandle {
    type Output = TbResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.join_rx.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(TbError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Val;
    use futures::future::poll_fn;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn forked_tasks_run_in_order() {
        clear_ready_queue();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            Task::fork(async move {
                log.lock().unwrap().push(i);
                Ok(Val::None)
            });
        }
        run_once();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn join_handle_yields_result() {
        clear_ready_queue();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        Task::fork(async move {
            let child = Task::fork(async { Ok(Val::Int(7)) });
            let val = child.await;
            *seen2.lock().unwrap() = Some(val.unwrap());
            Ok(Val::None)
        });
        run_once();
        assert_eq!(*seen.lock().unwrap(), Some(Val::Int(7)));
    }

    #[test]
    fn cancelled_task_resolves_join_with_error() {
        clear_ready_queue();
        let polls = Arc::new(AtomicU32::new(0));
        let polls2 = polls.clone();
        // never completes on its own
        let stuck = Task::fork(poll_fn(move |_| {
            polls2.fetch_add(1, Ordering::SeqCst);
            Poll::<TbResult>::Pending
        }));
        run_once();
        let task = stuck.task().unwrap();
        let outcome = Arc::new(Mutex::new(None));
        let outcome2 = outcome.clone();
        Task::fork(async move {
            *outcome2.lock().unwrap() = Some(stuck.await);
            Ok(Val::None)
        });
        run_once();
        task.cancel();
        run_once();
        assert_eq!(polls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            outcome.lock().unwrap().take(),
            Some(Err(TbError::Cancelled))
        ));
    }
}

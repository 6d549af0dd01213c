//! 执行上下文 - 调用链中的"当前" Span
//! Execution contexts: which span is "current" for a call chain
//!
//! [`ExecutionContext`] 是一个普通值，保存调用链已开启且尚未结束的 Span 栈。
//! 显式 API（`*_in` 方法）以 `&mut` 传入；环境 API 为每个 Tracer 在 tokio
//! task-local（[`with_task_context`] 内）或 thread-local 中各保存一个
//! [`ExecutionContext`] is a plain value holding the stack of spans a call
//! chain has opened and not yet ended. The explicit tracer API (`*_in`
//! methods) takes it by `&mut`; the ambient API keeps one per tracer in a
//! tokio task-local (inside [`with_task_context`]) or else a thread-local

use super::context::SpanId;
use super::span::Span;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;

/// 执行上下文 - 一条调用链中开启的 Span 栈
/// Stack of open spans for one execution context
#[derive(Debug, Default, Clone)]
pub struct ExecutionContext {
    stack: Vec<Span>,
}

/// 结束的 Span 在栈中的位置
/// Where an ended span sat on the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    /// 最内层的开启 Span
    /// It was the innermost open span
    Top,
    /// 其后开启的 Span 仍未结束；`current` 为最内层者
    /// Spans opened after it are still open; `current` is the innermost one
    Buried { current: SpanId },
    /// 该 Span 不是在此上下文中开启的
    /// The span was never opened in this context
    Absent,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尚未结束的最内层 Span
    /// Innermost span that has not ended yet
    pub fn current(&self) -> Option<&Span> {
        self.stack.iter().rev().find(|span| !span.is_ended())
    }

    /// 开启的 Span 数量
    /// Number of open spans
    pub fn depth(&self) -> usize {
        self.stack.iter().filter(|span| !span.is_ended()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    pub(crate) fn push(&mut self, span: Span) {
        self.prune();
        self.stack.push(span);
    }

    pub(crate) fn remove(&mut self, span: &Span) -> Removal {
        let Some(pos) = self
            .stack
            .iter()
            .rposition(|open| open.span_id() == span.span_id())
        else {
            return Removal::Absent;
        };

        let open_above = self.stack[pos + 1..]
            .iter()
            .rev()
            .find(|above| !above.is_ended())
            .map(Span::span_id);

        let removal = match open_above {
            None => {
                self.stack.truncate(pos);
                Removal::Top
            }
            Some(current) => {
                self.stack.remove(pos);
                Removal::Buried { current }
            }
        };
        self.prune();
        removal
    }

    /// 丢弃其它上下文结束后残留在栈顶的 Span
    /// Drop ended spans left on top by endings from other contexts
    fn prune(&mut self) {
        while self.stack.last().is_some_and(Span::is_ended) {
            self.stack.pop();
        }
    }
}

type ContextMap = HashMap<u64, ExecutionContext>;

thread_local! {
    static THREAD_CONTEXTS: RefCell<ContextMap> = RefCell::new(HashMap::new());
}

tokio::task_local! {
    static TASK_CONTEXTS: RefCell<ContextMap>;
}

/// 为 `fut` 提供随任务跨工作线程迁移的环境上下文，而不是使用执行线程的上下文
/// Run `fut` with its own ambient contexts that follow the task across
/// worker threads, instead of the executing thread's contexts
pub async fn with_task_context<F: Future>(fut: F) -> F::Output {
    TASK_CONTEXTS.scope(RefCell::new(HashMap::new()), fut).await
}

/// 借用 `tracer_id` 的环境上下文；`f` 不得重入环境 API
/// Borrow the ambient context of `tracer_id`; `f` must not re-enter the
/// ambient API
pub(crate) fn with_ambient<R>(tracer_id: u64, f: impl FnOnce(&mut ExecutionContext) -> R) -> R {
    let run = |contexts: &RefCell<ContextMap>| {
        let mut map = contexts.borrow_mut();
        let cx = map.entry(tracer_id).or_default();
        let result = f(cx);
        if cx.stack.is_empty() {
            map.remove(&tracer_id);
        }
        result
    };

    if TASK_CONTEXTS.try_with(|_| ()).is_ok() {
        TASK_CONTEXTS.with(run)
    } else {
        THREAD_CONTEXTS.with(run)
    }
}

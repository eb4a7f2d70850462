//! Circular task list with a cursor on the running task.

use crate::task::{Task, TaskId};
use alloc::boxed::Box;
use alloc::vec::Vec;

/// Tasks in scheduling order.
///
/// Tasks are boxed so their [`Context`](crate::Context) keeps its address
/// while the list grows; the context switch holds raw pointers to it.
#[derive(Debug, Default)]
pub struct TaskList {
    tasks: Vec<Box<Task>>,
    cursor: usize,
}

impl TaskList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cursor: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Inserts `task` right behind the cursor so it runs next.
    /// The first task becomes the current one.
    pub fn insert_after_current(&mut self, task: Box<Task>) {
        if self.tasks.is_empty() {
            self.tasks.push(task);
            self.cursor = 0;
        } else {
            self.tasks.insert(self.cursor + 1, task);
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&Task> {
        self.tasks.get(self.cursor).map(Box::as_ref)
    }

    pub fn current_mut(&mut self) -> Option<&mut Task> {
        self.tasks.get_mut(self.cursor).map(Box::as_mut)
    }

    /// Moves the cursor to the next task, wrapping to the head.
    pub fn advance(&mut self) -> Option<&mut Task> {
        if self.tasks.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1) % self.tasks.len();
        self.current_mut()
    }

    /// Task ids in scheduling order, starting at the head.
    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.iter().map(|t| t.id())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().map(Box::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::Stack;
    use crate::task::Context;

    fn task(id: u32) -> Box<Task> {
        Box::new(Task::new(TaskId::new(id), Context::default(), Stack::new(0, 0)))
    }

    fn current(list: &TaskList) -> u32 {
        list.current().unwrap().id().as_u32()
    }

    #[test]
    fn new_tasks_run_next() {
        let mut list = TaskList::new();
        list.insert_after_current(task(0));
        list.insert_after_current(task(1));
        list.insert_after_current(task(2));

        assert_eq!(list.ids().map(TaskId::as_u32).collect::<Vec<_>>(), [0, 2, 1]);
        assert_eq!(current(&list), 0);
        list.advance();
        assert_eq!(current(&list), 2);
    }

    #[test]
    fn advance_wraps() {
        let mut list = TaskList::new();
        for id in 0..3 {
            list.insert_after_current(task(id));
            list.advance();
        }
        // inserted behind the cursor each time: 0, 1, 2 in order
        assert_eq!(list.ids().map(TaskId::as_u32).collect::<Vec<_>>(), [0, 1, 2]);
        assert_eq!(current(&list), 0);

        let seen: Vec<u32> = (0..4).map(|_| list.advance().unwrap().id().as_u32()).collect();
        assert_eq!(seen, [1, 2, 0, 1]);
    }

    #[test]
    fn empty_list() {
        let mut list = TaskList::new();
        assert!(list.is_empty());
        assert!(list.current().is_none());
        assert!(list.advance().is_none());
    }

    #[test]
    fn contexts_do_not_move() {
        let mut list = TaskList::new();
        list.insert_after_current(task(0));
        let before: *const Context = list.current().unwrap().context();
        for id in 1..64 {
            list.insert_after_current(task(id));
        }
        let after: *const Context = list.current().unwrap().context();
        assert_eq!(before, after);
    }
}

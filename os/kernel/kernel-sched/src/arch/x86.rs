//! i686 context switch.
//!
//! A suspended task's stack holds its callee-saved registers:
//!
//! ```text
//!  esp ─► ┌─────────┐
//!         │  ebp    │
//!         │  edi    │
//!         │  esi    │
//!         │  ebx    │
//!         │  ret    │ back into the caller of `switch`
//!         └─────────┘
//! ```
//!
//! Its [`Context`] points `eip` at [`resume_context`], which pops them and
//! returns. A task that never ran instead has `eip` at [`task_trampoline`] and
//! the frame prepared by [`Stack::prepare_first_frame`](crate::Stack::prepare_first_frame).

use crate::scheduler::run_task;
use crate::stack::{Stack, copy_stack};
use crate::task::{Context, TaskEntry};
use crate::Cpu;

/// The processor the kernel runs on.
#[derive(Debug, Default, Copy, Clone)]
pub struct X86Cpu;

impl Cpu for X86Cpu {
    #[inline]
    fn entry_trampoline(&self) -> usize {
        task_trampoline as usize
    }

    #[inline]
    unsafe fn switch(&self, prev: *mut Context, next: *const Context) {
        unsafe { switch_context(prev, next) }
    }

    #[inline]
    unsafe fn move_stack(&self, old: &Stack, new: &Stack) {
        unsafe { move_running_stack(old, new) }
    }
}

/// Copies the running stack and returns on the copy.
///
/// Every frame up to and including this call's return address is copied
/// before the stack and frame pointer move, so callers resume at the same
/// offsets in the copy with their saved `ebp` chain rewritten. Words held in
/// registers are not rewritten; callers must not keep stack addresses in
/// them across the call.
///
/// ## Calling convention
/// cdecl: `old` at `[esp + 4]`, `new` at `[esp + 8]`. Returns with `esp`
/// and `ebp` moved by `new.top() - old.top()`.
#[unsafe(naked)]
unsafe extern "C" fn move_running_stack(_old: *const Stack, _new: *const Stack) {
    core::arch::naked_asm!(
        "push dword ptr [esp + 8]", // new
        "push dword ptr [esp + 8]", // old
        "call {copy}",
        "add esp, 8",
        "add esp, eax",
        "add ebp, eax",
        "ret",
        copy = sym copy_running_stack,
    )
}

/// Returns the distance the stack moved.
unsafe extern "C" fn copy_running_stack(old: &Stack, new: &Stack) -> isize {
    // SAFETY: forwarded from `move_running_stack`.
    unsafe { copy_stack(old, new) }
}

/// Saves the callee-saved registers and stack state into `*prev`, then
/// loads `*next` and jumps to its `eip`.
///
/// ## Calling convention
/// cdecl: `prev` at `[esp + 4]`, `next` at `[esp + 8]`. Returns (through
/// [`resume_context`]) when `prev` is switched back to.
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_prev: *mut Context, _next: *const Context) {
    core::arch::naked_asm!(
        "mov eax, [esp + 4]",  // prev
        "mov edx, [esp + 8]",  // next
        "push ebx",
        "push esi",
        "push edi",
        "push ebp",
        "mov dword ptr [eax], offset {resume}",
        "mov [eax + 4], esp",
        "mov [eax + 8], ebp",
        "mov esp, [edx + 4]",
        "mov ebp, [edx + 8]",
        "jmp dword ptr [edx]",
        resume = sym resume_context,
    )
}

/// Where a suspended task continues: the tail of [`switch_context`].
#[unsafe(naked)]
unsafe extern "C" fn resume_context() {
    core::arch::naked_asm!(
        "pop ebp",
        "pop edi",
        "pop esi",
        "pop ebx",
        "ret",
    )
}

/// First code of every new task.
///
/// Reached by a jump with `esp` on the prepared frame, which looks like a
/// cdecl call with a null return address.
extern "C" fn task_trampoline(entry: TaskEntry, arg: *mut ()) -> ! {
    run_task(entry, arg)
}

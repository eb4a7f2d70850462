use core::cell::{Cell, RefCell};
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_info::sched::TIMER_FREQUENCY_HZ;
use kernel_interrupts::{InterruptFrame, InterruptHandler, PeriodicTimer, TimerError};
use kernel_sched::{
    Context, Cpu, SchedError, Scheduler, Stack, StackAlloc, TaskEntry, TaskId, copy_stack, run_task,
    task_init, task_switch, yield_now,
};
use kernel_sync::IrqLock;
use kernel_sync::irq::{cli_stop_interrupts, interrupts_enabled, sti_enable_interrupts};

const STACK_WORDS: usize = 1024;
const TRAMPOLINE: usize = 0x1000;
const RESUMED: usize = 0x2000;

/// Stacks carved from leaked host vectors.
struct VecStacks {
    limit: usize,
    handed_out: usize,
}

impl VecStacks {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            handed_out: 0,
        }
    }
}

impl StackAlloc for VecStacks {
    fn alloc_stack(&mut self) -> Option<Stack> {
        if self.handed_out == self.limit {
            return None;
        }
        self.handed_out += 1;
        let memory = vec![0usize; STACK_WORDS].leak();
        Some(Stack::new(memory.as_mut_ptr().addr(), STACK_WORDS * size_of::<usize>()))
    }
}

/// Plays the processor: a switch into a prepared first frame "starts" the
/// task by calling its entry once; any other switch just resumes.
#[derive(Default)]
struct SimCpu {
    switches: Cell<usize>,
    moved_by: Cell<Option<isize>>,
    irq_on_during_switch: Cell<bool>,
}

impl Cpu for SimCpu {
    fn entry_trampoline(&self) -> usize {
        TRAMPOLINE
    }

    unsafe fn switch(&self, prev: *mut Context, next: *const Context) {
        self.switches.set(self.switches.get() + 1);
        self.irq_on_during_switch.set(interrupts_enabled());

        let next = unsafe { *next };
        unsafe { (*prev).eip = RESUMED };
        if next.eip == TRAMPOLINE {
            let frame = unsafe { *(next.esp as *const [usize; 3]) };
            let entry = unsafe { core::mem::transmute::<usize, TaskEntry>(frame[1]) };
            entry(ptr::with_exposed_provenance_mut(frame[2]));
        }
    }

    unsafe fn move_stack(&self, old: &Stack, new: &Stack) {
        let delta = unsafe { copy_stack(old, new) };
        self.moved_by.set(Some(delta));
    }
}

#[derive(Default)]
struct FakeTimer {
    armed: RefCell<Vec<u32>>,
}

impl PeriodicTimer for FakeTimer {
    fn arm(&mut self, hz: u32, _handler: &'static dyn InterruptHandler) -> Result<(), TimerError> {
        kernel_interrupts::pit_divisor(hz)?;
        self.armed.borrow_mut().push(hz);
        Ok(())
    }
}

static TICK: fn(&mut InterruptFrame) = |_| {};

/// Stands for a task body: records that it started, then "runs forever".
extern "C" fn count_start(arg: *mut ()) {
    let counter = unsafe { &*arg.cast::<AtomicUsize>() };
    counter.fetch_add(1, Ordering::SeqCst);
}

fn counter_arg(counter: &'static AtomicUsize) -> *mut () {
    ptr::from_ref(counter).cast_mut().cast()
}

fn boot_stack() -> Stack {
    let memory = vec![0usize; 256].leak();
    Stack::new(memory.as_mut_ptr().addr(), 256 * size_of::<usize>())
}

fn scheduler_with_boot_task(stacks: usize) -> Scheduler<VecStacks> {
    let mut scheduler = Scheduler::new(VecStacks::new(stacks));
    scheduler.adopt_current(boot_stack());
    scheduler
}

fn current(lock: &IrqLock<Scheduler<VecStacks>>) -> u32 {
    lock.with_lock(|s| s.current_id().unwrap().as_u32())
}

#[test]
fn every_task_runs_once_per_round() {
    static STARTS: AtomicUsize = AtomicUsize::new(0);
    let cpu = SimCpu::default();
    let mut scheduler = scheduler_with_boot_task(8);
    for _ in 0..3 {
        scheduler.thread_create(&cpu, count_start, counter_arg(&STARTS));
    }
    let lock = IrqLock::new(scheduler);

    let mut seen: Vec<u32> = (0..4)
        .map(|_| {
            task_switch(&lock, &cpu);
            current(&lock)
        })
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, [0, 1, 2, 3]);
    assert_eq!(STARTS.load(Ordering::SeqCst), 3);
}

#[test]
fn two_children_over_six_ticks() {
    static FIRST: AtomicUsize = AtomicUsize::new(0);
    static SECOND: AtomicUsize = AtomicUsize::new(0);

    let cpu = SimCpu::default();
    let mut timer = FakeTimer::default();
    let scheduler =
        unsafe { task_init(VecStacks::new(8), &cpu, boot_stack(), &mut timer, &TICK) }.unwrap();
    let lock = IrqLock::new(scheduler);

    let a = lock.with_lock(|s| s.thread_create(&cpu, count_start, counter_arg(&FIRST)));
    let b = lock.with_lock(|s| s.thread_create(&cpu, count_start, counter_arg(&SECOND)));
    assert_eq!((a, b), (TaskId::new(1), TaskId::new(2)));

    let order: Vec<u32> = (0..6)
        .map(|_| {
            task_switch(&lock, &cpu);
            current(&lock)
        })
        .collect();

    // the newest task sits right behind the cursor
    assert_eq!(order, [2, 1, 0, 2, 1, 0]);
    assert_eq!(FIRST.load(Ordering::SeqCst), 1);
    assert_eq!(SECOND.load(Ordering::SeqCst), 1);
    assert_eq!(cpu.switches.get(), 6);
}

#[test]
fn task_init_moves_the_boot_stack() {
    let cpu = SimCpu::default();
    let mut timer = FakeTimer::default();
    let boot = boot_stack();

    let words = unsafe { core::slice::from_raw_parts_mut(boot.base() as *mut usize, 256) };
    let frame_pointer = boot.base() + 200 * size_of::<usize>();
    words[100] = frame_pointer;
    words[101] = 12345;

    let scheduler = unsafe { task_init(VecStacks::new(1), &cpu, boot, &mut timer, &TICK) }.unwrap();
    assert_eq!(*timer.armed.borrow(), [TIMER_FREQUENCY_HZ]);
    assert_eq!(scheduler.current_id(), Some(TaskId::new(0)));
    assert_eq!(scheduler.task_count(), 1);

    let stack = *scheduler.tasks().current().unwrap().stack();
    let delta = cpu.moved_by.get().unwrap();
    assert_eq!(delta, stack.top().wrapping_sub(boot.top()) as isize);

    let copy_base = stack.top() - boot.size();
    let copy = unsafe { core::slice::from_raw_parts(copy_base as *const usize, 256) };
    assert_eq!(copy[100], copy_base + 200 * size_of::<usize>());
    assert_eq!(copy[101], 12345);
}

#[test]
fn task_init_without_stack_memory() {
    let cpu = SimCpu::default();
    let mut timer = FakeTimer::default();
    let result = unsafe { task_init(VecStacks::new(0), &cpu, boot_stack(), &mut timer, &TICK) };
    assert!(matches!(result, Err(SchedError::StackAllocation)));
    assert!(timer.armed.borrow().is_empty());
}

#[test]
fn a_single_task_never_switches() {
    let cpu = SimCpu::default();
    let lock = IrqLock::new(scheduler_with_boot_task(1));
    assert!(lock.with_lock(Scheduler::prepare_switch).is_none());

    yield_now(&lock, &cpu);
    assert_eq!(cpu.switches.get(), 0);
    assert_eq!(current(&lock), 0);
}

#[test]
fn switch_runs_with_interrupts_off_and_restores_them() {
    static STARTS: AtomicUsize = AtomicUsize::new(0);
    let cpu = SimCpu::default();
    let mut scheduler = scheduler_with_boot_task(1);
    scheduler.thread_create(&cpu, count_start, counter_arg(&STARTS));
    let lock = IrqLock::new(scheduler);

    sti_enable_interrupts();
    yield_now(&lock, &cpu);
    assert!(!cpu.irq_on_during_switch.get());
    assert!(interrupts_enabled());
    cli_stop_interrupts();
}

#[test]
fn thread_create_needs_a_running_task() {
    let cpu = SimCpu::default();
    let mut scheduler = Scheduler::new(VecStacks::new(4));
    assert_eq!(
        scheduler.try_thread_create(&cpu, count_start, ptr::null_mut()),
        Err(SchedError::NoCurrentTask)
    );
}

#[test]
fn thread_create_reports_stack_exhaustion() {
    let cpu = SimCpu::default();
    let mut scheduler = scheduler_with_boot_task(0);
    assert_eq!(
        scheduler.try_thread_create(&cpu, count_start, ptr::null_mut()),
        Err(SchedError::StackAllocation)
    );
    assert_eq!(scheduler.task_count(), 1);
}

#[test]
#[should_panic(expected = "thread_create: no memory for a task stack")]
fn thread_create_panics_without_stacks() {
    let cpu = SimCpu::default();
    let mut scheduler = scheduler_with_boot_task(0);
    scheduler.thread_create(&cpu, count_start, ptr::null_mut());
}

#[test]
fn task_ids_increase_monotonically() {
    let cpu = SimCpu::default();
    let mut scheduler = scheduler_with_boot_task(4);
    let ids: Vec<u32> = (0..4)
        .map(|_| {
            scheduler
                .thread_create(&cpu, count_start, ptr::null_mut())
                .as_u32()
        })
        .collect();
    assert_eq!(ids, [1, 2, 3, 4]);
}

#[test]
fn new_task_starts_in_the_trampoline() {
    let cpu = SimCpu::default();
    let mut scheduler = scheduler_with_boot_task(1);
    let id = scheduler.thread_create(&cpu, count_start, ptr::null_mut());

    let task = scheduler.tasks().iter().find(|t| t.id() == id).unwrap();
    assert_eq!(task.context().eip, TRAMPOLINE);
    assert_eq!(task.context().ebp, 0);
    assert!(task.stack().contains(task.context().esp));
}

extern "C" fn returns_immediately(_: *mut ()) {
    assert!(interrupts_enabled(), "task entered with interrupts off");
}

#[test]
#[should_panic(expected = "task entry returned")]
fn returning_from_a_task_is_fatal() {
    cli_stop_interrupts();
    run_task(returns_immediately, ptr::null_mut());
}

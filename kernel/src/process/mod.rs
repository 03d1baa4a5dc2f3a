/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Tasks: the process/thread model, fork/exit/wait, and the process table.
//!
//! A `Task` bundles an address space, a file descriptor table, credentials and signal
//! disposition. There is no separate thread/process distinction (§2): every task owns its own
//! address space, created either fresh (pid 0, the idle task) or by [`AddressSpace::clone_user_half`]
//! on `fork`.

pub mod exec;
pub mod scheduler;
pub mod signal;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use utils::errno::{errno, EResult};
use utils::limits::OPEN_MAX;
use utils::lock::IntMutex;

use crate::file::vfs::OpenFile;
use crate::memory::vmem::AddressSpace;
use signal::{SigAction, Signal};

/// A process/task identifier.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Pid(pub u32);

/// The idle task's pid, always runnable, scheduled only when nothing else is.
pub const KTASK_PID: Pid = Pid(0);

/// A task's scheduling state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
	/// Runnable or running.
	Running,
	/// Blocked until explicitly woken (a condvar, a timer, a signal).
	Sleeping,
	/// Exited; retains its exit status until a parent `wait`s on it.
	Zombie,
}

/// Per-task credentials (§4.6): the BSD-style real/effective/saved uid and gid triples.
#[derive(Clone, Copy, Debug)]
pub struct Credentials {
	/// Real user ID.
	pub uid: u32,
	/// Effective user ID, consulted for permission checks.
	pub euid: u32,
	/// Saved user ID, restorable by a privileged process that has dropped `euid`.
	pub suid: u32,
	/// Real group ID.
	pub gid: u32,
	/// Effective group ID.
	pub egid: u32,
	/// Saved group ID.
	pub sgid: u32,
}

impl Credentials {
	/// Credentials for a process that starts out running as `uid`/`gid` with matching
	/// effective/saved values, as every task does at creation (only `setuid`-family calls diverge
	/// them afterward).
	pub const fn new(uid: u32, gid: u32) -> Self {
		Self {
			uid,
			euid: uid,
			suid: uid,
			gid,
			egid: gid,
			sgid: gid,
		}
	}
}

/// A task.
pub struct Task {
	pub pid: Pid,
	pub ppid: Pid,
	pub pgid: Pid,
	pub state: State,
	pub creds: Credentials,
	pub address_space: Arc<AddressSpace>,
	pub fds: [Option<Arc<IntMutex<OpenFile>>>; OPEN_MAX],
	pub cwd: alloc::string::String,
	pub sigactions: [SigAction; 32],
	pub sigmask: signal::SigSet,
	pub pending: signal::SigSet,
	/// Exit status, valid once `state == Zombie`.
	pub exit_status: i32,
	/// Ticks remaining in the current scheduling quantum.
	pub timeslice: u32,
	/// The trap frame interrupted to deliver a signal, restored wholesale by `sigreturn` once the
	/// handler returns. `None` outside of a signal handler.
	pub saved_frame: Option<crate::arch::TrapFrame>,
	/// `(entry_eip, user_esp)` computed by a just-completed `execve`, pending application onto the
	/// live trap frame by the syscall-return path (or, for the very first task, by the boot-time
	/// first-entry-to-user-mode path — both lie outside this module's scope, §6).
	pub exec_entry: Option<(usize, usize)>,
}

impl Task {
	fn new(pid: Pid, ppid: Pid, address_space: AddressSpace, creds: Credentials) -> Self {
		const NO_FD: Option<Arc<IntMutex<OpenFile>>> = None;
		Self {
			pid,
			ppid,
			pgid: pid,
			state: State::Running,
			creds,
			address_space: Arc::new(address_space),
			fds: [NO_FD; OPEN_MAX],
			cwd: alloc::string::String::from("/"),
			sigactions: [SigAction::default(); 32],
			sigmask: signal::SigSet::empty(),
			pending: signal::SigSet::empty(),
			exit_status: 0,
			timeslice: scheduler::SCHED_TIMESLICE,
			saved_frame: None,
			exec_entry: None,
		}
	}
}

struct ProcessTable {
	tasks: BTreeMap<Pid, Task>,
	next_pid: u32,
	current: Pid,
}

static TABLE: IntMutex<Option<ProcessTable>> = IntMutex::new(None);

/// Initializes the process table and creates the idle task (pid 0) around whatever address space
/// is currently active (the boot directory, adopted by [`crate::memory::vmem::init`]).
pub fn init() {
	let idle_space = AddressSpace::new().unwrap_or_else(|_| panic!("out of memory creating idle task"));
	let idle = Task::new(KTASK_PID, KTASK_PID, idle_space, Credentials::new(0, 0));
	let mut tasks = BTreeMap::new();
	tasks.insert(KTASK_PID, idle);
	*TABLE.lock() = Some(ProcessTable {
		tasks,
		next_pid: 1,
		current: KTASK_PID,
	});
}

fn with_table<R>(f: impl FnOnce(&mut ProcessTable) -> R) -> R {
	let mut table = TABLE.lock();
	f(table.as_mut().expect("process table not initialized"))
}

/// The currently running task's pid.
pub fn current_pid() -> Pid {
	with_table(|t| t.current)
}

/// Runs `f` with mutable access to the task identified by `pid`, if it exists.
pub fn with_task<R>(pid: Pid, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
	with_table(|t| t.tasks.get_mut(&pid).map(f))
}

/// Runs `f` with mutable access to the currently running task.
pub fn with_current<R>(f: impl FnOnce(&mut Task) -> R) -> R {
	let pid = current_pid();
	with_task(pid, f).expect("current task missing from process table")
}

/// Calls `f` once for every live task's address space.
///
/// Used by [`crate::memory::vmem::page_fault`] to propagate a newly populated kernel-half page
/// directory entry into every other directory (§4.4). Runs with interrupts disabled for its whole
/// duration, since it holds the process table's `IntMutex` throughout.
pub fn for_each_address_space(mut f: impl FnMut(&Arc<AddressSpace>)) {
	with_table(|table| {
		for task in table.tasks.values() {
			f(&task.address_space);
		}
	});
}

/// Creates a child of the currently running task, duplicating its address space, file
/// descriptors, signal dispositions and credentials. Returns the child's pid.
pub fn fork() -> EResult<Pid> {
	let (child_pid, child) = with_table(|table| {
		let parent_pid = table.current;
		let parent = table.tasks.get(&parent_pid).expect("current task missing");
		let child_space = parent
			.address_space
			.clone_user_half()
			.map_err(|_| errno!(ENOMEM))?;
		let pid = Pid(table.next_pid);
		table.next_pid += 1;
		let mut child = Task::new(pid, parent_pid, child_space, parent.creds);
		child.pgid = parent.pgid;
		child.fds = parent.fds.clone();
		child.cwd = parent.cwd.clone();
		child.sigactions = parent.sigactions;
		child.sigmask = parent.sigmask;
		Ok::<_, utils::errno::Errno>((pid, child))
	})?;
	with_table(|table| {
		table.tasks.insert(child_pid, child);
	});
	scheduler::enqueue(child_pid);
	Ok(child_pid)
}

/// Terminates the currently running task with `status`, reparenting its children to pid 1 and
/// waking any parent blocked in `waitpid`.
pub fn exit(status: i32) -> ! {
	let (pid, ppid) = with_current(|task| {
		task.state = State::Zombie;
		task.exit_status = status;
		(task.pid, task.ppid)
	});
	with_table(|table| {
		for (_, other) in table.tasks.iter_mut() {
			if other.ppid == pid {
				other.ppid = Pid(1);
			}
		}
	});
	scheduler::wake(ppid);
	scheduler::reschedule_and_never_return()
}

/// Waits for a child of the current task to become a zombie, reaps it and returns its
/// `(pid, status)`.
///
/// `target`, if given, restricts the wait to that specific child; otherwise any child's exit
/// satisfies the wait. If `nohang` is set and no matching child is already a zombie, returns
/// `Ok(None)` immediately instead of blocking. Returns `ECHILD` if the current task has no children
/// matching `target` at all (including `target` not naming a child of the caller).
pub fn waitpid(target: Option<Pid>, nohang: bool) -> EResult<Option<(Pid, i32)>> {
	let me = current_pid();
	loop {
		let found = with_table(|table| {
			let is_candidate = |t: &Task| t.ppid == me && match target {
				Some(p) => t.pid == p,
				None => true,
			};
			let has_children = table.tasks.values().any(is_candidate);
			if !has_children {
				return Err(errno!(ECHILD));
			}
			let zombie = table
				.tasks
				.values()
				.find(|t| is_candidate(t) && t.state == State::Zombie)
				.map(|t| (t.pid, t.exit_status));
			Ok(zombie)
		})?;
		if let Some((pid, status)) = found {
			with_table(|table| table.tasks.remove(&pid));
			return Ok(Some((pid, status)));
		}
		if nohang {
			return Ok(None);
		}
		scheduler::block_current();
	}
}

/// Delivers `signal` to `target`, setting it pending; actual dispatch happens the next time
/// `target` is scheduled (see [`signal::prepare_execution`]).
pub fn kill(target: Pid, signal: Signal) -> EResult<()> {
	with_task(target, |task| {
		task.pending.insert(signal);
		if task.state == State::Sleeping {
			task.state = State::Running;
		}
	})
	.ok_or(errno!(ESRCH))?;
	scheduler::wake(target);
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn fork_child_inherits_parent_credentials() {
		let parent_creds = with_current(|t| t.creds);
		let child = fork().expect("fork");
		let child_creds = with_task(child, |t| t.creds).expect("child exists");
		assert_eq!(child_creds.uid, parent_creds.uid);
		assert_eq!(child_creds.euid, parent_creds.euid);
		let ppid = with_task(child, |t| t.ppid).expect("child exists");
		assert_eq!(ppid, current_pid());
		with_table(|table| {
			table.tasks.remove(&child);
		});
	}

	#[test_case]
	fn fork_then_waitpid_reaps_child_with_status() {
		let child = fork().expect("fork");
		with_task(child, |t| {
			t.state = State::Zombie;
			t.exit_status = 7;
		});
		let (pid, status) = waitpid(Some(child), false)
			.expect("waitpid")
			.expect("zombie present");
		assert_eq!(pid, child);
		assert_eq!(status, 7);
	}

	#[test_case]
	fn waitpid_on_unknown_pid_is_echild() {
		let fake = Pid(0x00dd_ead0);
		assert_eq!(waitpid(Some(fake), true), Err(errno!(ECHILD)));
	}

	#[test_case]
	fn waitpid_nohang_returns_none_without_blocking() {
		let child = fork().expect("fork");
		assert_eq!(waitpid(Some(child), true), Ok(None));
		with_table(|table| {
			table.tasks.remove(&child);
		});
	}
}

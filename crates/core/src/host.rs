//! Process and host figures reported alongside the operator stats.

use serde::Serialize;
use sysinfo::{ProcessesToUpdate, System};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStats {
	pub platform: &'static str,
	pub arch: &'static str,
	/// Resident memory of this process; `None` where it cannot be read.
	pub rss_bytes: Option<u64>,
	pub total_memory_bytes: u64,
	pub used_memory_bytes: u64,
}

impl HostStats {
	pub fn free_memory_bytes(&self) -> u64 {
		self.total_memory_bytes.saturating_sub(self.used_memory_bytes)
	}
}

/// Takes a fresh sample. Refreshes only this process and the memory counters.
pub fn sample() -> HostStats {
	let mut system = System::new();
	system.refresh_memory();

	let rss_bytes = sysinfo::get_current_pid().ok().and_then(|pid| {
		system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
		system.process(pid).map(|process| process.memory())
	});

	HostStats {
		platform: std::env::consts::OS,
		arch: std::env::consts::ARCH,
		rss_bytes,
		total_memory_bytes: system.total_memory(),
		used_memory_bytes: system.used_memory(),
	}
}

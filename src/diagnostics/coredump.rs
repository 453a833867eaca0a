/*!
 * Core Dumps
 * Serializes a terminated process's region table and termination cause
 *
 * Written during finalize for dumpable processes; a failure here is logged
 * by the caller and never blocks the remaining teardown steps.
 */

use crate::core::errors::{VfsError, VfsResult};
use crate::core::types::Pid;
use crate::process::credentials::Credentials;
use crate::process::process::Process;
use crate::vfs::{OpenFlags, Vfs};
use log::info;
use serde::Serialize;
use std::sync::Arc;

const MAGIC: &str = "VKCD";
const VERSION: u32 = 1;

#[derive(Serialize)]
struct RegionRecord {
    base: u64,
    size: u64,
    name: String,
    protection: String,
}

#[derive(Serialize)]
struct DumpBody {
    magic: &'static str,
    version: u32,
    pid: Pid,
    name: String,
    termination_signal: Option<u32>,
    termination_status: i32,
    regions: Vec<RegionRecord>,
}

pub struct CoreDump {
    process: Arc<Process>,
    vfs: Arc<Vfs>,
    path: String,
}

impl CoreDump {
    pub fn create(process: Arc<Process>, vfs: Arc<Vfs>, path: impl Into<String>) -> CoreDump {
        CoreDump {
            process,
            vfs,
            path: path.into(),
        }
    }

    /// Serialize and write the dump through the filesystem capability.
    pub fn write(&self) -> VfsResult<()> {
        let regions = self
            .process
            .space()
            .regions_snapshot()
            .into_iter()
            .map(|r| RegionRecord {
                base: r.base,
                size: r.size,
                name: r.name,
                protection: r.protection.describe(),
            })
            .collect();

        let body = DumpBody {
            magic: MAGIC,
            version: VERSION,
            pid: self.process.pid(),
            name: self.process.name(),
            termination_signal: self.process.termination_signal().map(|s| s.number()),
            termination_status: self.process.termination_status(),
            regions,
        };
        let bytes = serde_json::to_vec_pretty(&body)
            .map_err(|e| VfsError::WriteFailed(e.to_string()))?;

        let file = self.vfs.open(
            &self.path,
            OpenFlags::CREATE | OpenFlags::WRITE | OpenFlags::TRUNCATE,
            0o600,
            &self.vfs.root_directory(),
            &Credentials::root(),
        )?;
        file.write(&bytes)?;

        info!(
            "core dump for pid {} written to {} ({} bytes)",
            self.process.pid(),
            self.path,
            bytes.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Protection;
    use crate::signals::Signal;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dump_body_roundtrips_through_vfs() {
        let vfs = Vfs::new();
        let process = Process::for_tests(Pid(21), "dumpee");
        process
            .space()
            .add_region("text", 0x40_0000, 0x2000, Protection::READ | Protection::EXECUTE);
        process.set_termination_signal(Signal::SIGSEGV);

        let dump = CoreDump::create(
            Arc::clone(&process),
            Arc::clone(&vfs),
            "/tmp/dumps/dumpee_21_0.core",
        );
        dump.write().unwrap();

        let bytes = vfs.read_file("/tmp/dumps/dumpee_21_0.core").unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["magic"], "VKCD");
        assert_eq!(body["pid"], 21);
        assert_eq!(body["termination_signal"], 11);
        assert_eq!(body["regions"][0]["name"], "text");
        assert_eq!(body["regions"][0]["protection"], "r-x");
    }

    #[test]
    fn test_unwritable_path_reports_error() {
        let vfs = Vfs::new();
        let process = Process::for_tests(Pid(22), "dumpee");
        let dump = CoreDump::create(process, vfs, "/no-such-dir/x.core");
        assert!(dump.write().is_err());
    }
}

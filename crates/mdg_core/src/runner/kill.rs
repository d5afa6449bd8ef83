//! Process-tree termination backends.
//!
//! Invoked tools may spawn helper subprocesses, so termination always
//! targets the whole tree. On Unix the child is placed in its own process
//! group at spawn time and signals go to the group; on Windows `taskkill /T`
//! removes the tree in one shot.

#[cfg(unix)]
mod imp {
    /// Ask the process group to stop (SIGTERM).
    pub fn terminate_tree(pid: u32) {
        if pid == 0 {
            return;
        }
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
    }

    /// Force-kill the process group (SIGKILL).
    pub fn kill_tree(pid: u32) {
        if pid == 0 {
            return;
        }
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }

    /// Whether the group leader still exists (signal 0 probe).
    pub fn is_alive(pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
}

#[cfg(windows)]
mod imp {
    use std::process::Command;

    pub fn terminate_tree(pid: u32) {
        if pid == 0 {
            return;
        }
        let _ = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T"])
            .output();
    }

    pub fn kill_tree(pid: u32) {
        if pid == 0 {
            return;
        }
        let _ = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output();
    }

    pub fn is_alive(pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}

pub use imp::{is_alive, kill_tree, terminate_tree};

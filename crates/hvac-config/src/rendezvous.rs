//! Rendezvous file: the `./.ports.cfg.<jobid>` append-only file servers use
//! to advertise their listen address, and clients read to discover it.
//!
//! One `"<rank> <address>\n"` line per server, written once at startup and
//! never rewritten.

use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

/// Path of the rendezvous file for a given SLURM job id, in the current
/// working directory.
pub fn rendezvous_path(job_id: &str) -> PathBuf {
    PathBuf::from(format!("./.ports.cfg.{job_id}"))
}

/// Appends one `"<rank> <address>"` line. Called once by each server at
/// startup after it has bound its listener.
pub fn append_line(job_id: &str, rank: u32, address: &str) -> io::Result<()> {
    let path = rendezvous_path(job_id);
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{rank} {address}")?;
    file.flush()
}

/// Reads the advertised address for `rank`, scanning every line (the file
/// is small and append-only, so a linear scan per lookup is fine — results
/// are cached by callers once resolved, matching `hvac_comm_client`'s
/// addr-cache behavior).
pub fn read_address(job_id: &str, rank: u32) -> io::Result<Option<String>> {
    let path = rendezvous_path(job_id);
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    for line in BufReader::new(file).lines() {
        let line = line?;
        let mut parts = line.splitn(2, ' ');
        let line_rank = parts.next().and_then(|s| s.parse::<u32>().ok());
        let addr = parts.next();
        if let (Some(line_rank), Some(addr)) = (line_rank, addr) {
            if line_rank == rank {
                return Ok(Some(addr.to_string()));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // `set_current_dir` is process-global; serialize tests that touch it.
    static CWD_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn append_then_read_round_trips() {
        let _g = CWD_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let saved = env::current_dir().unwrap();
        env::set_current_dir(dir.path()).unwrap();

        let job_id = "roundtrip";
        append_line(job_id, 0, "tcp://127.0.0.1:9001").unwrap();
        append_line(job_id, 1, "tcp://127.0.0.1:9002").unwrap();

        assert_eq!(
            read_address(job_id, 1).unwrap(),
            Some("tcp://127.0.0.1:9002".to_string())
        );
        assert_eq!(
            read_address(job_id, 0).unwrap(),
            Some("tcp://127.0.0.1:9001".to_string())
        );
        assert_eq!(read_address(job_id, 7).unwrap(), None);

        env::set_current_dir(saved).unwrap();
    }

    #[test]
    fn missing_file_returns_none() {
        let _g = CWD_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let saved = env::current_dir().unwrap();
        env::set_current_dir(dir.path()).unwrap();

        assert_eq!(read_address("missing-job", 0).unwrap(), None);

        env::set_current_dir(saved).unwrap();
    }
}

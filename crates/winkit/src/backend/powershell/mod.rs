//! Real host backend using PowerShell scripts.
//!
//! Each (kind, verb) pair has a fixed script. Input travels as JSON on
//! stdin, output as compressed JSON on stdout. Scripts are passed with
//! `-EncodedCommand` so no quoting of user data is ever involved.

mod scripts;

use crate::backend::{Backend, ListFilter, Opaque, screen};
use crate::error::{Error, Result};
use crate::types::{Record, RecordKind};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Deadline for list and probe calls.
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// How often a running script is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Verb of a host script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verb {
    List,
    Put,
    Remove,
}

/// Backend that runs PowerShell on the local host.
pub struct PowerShellBackend {
    /// Path to pwsh.exe or powershell.exe
    exe: PathBuf,
}

impl PowerShellBackend {
    /// Create a new PowerShellBackend.
    ///
    /// Prefers PowerShell 7 (`pwsh`) and falls back to Windows PowerShell.
    /// Returns an error if neither is on PATH.
    pub fn new() -> Result<Self> {
        let exe = which::which("pwsh")
            .or_else(|_| which::which("powershell"))
            .map_err(|_| Error::Unavailable {
                message: "neither pwsh nor powershell found in PATH".to_string(),
            })?;
        log::debug!("Using PowerShell at {}", exe.display());
        Ok(Self { exe })
    }

    /// Run a script with JSON input and return its stdout.
    fn run(
        &self,
        kind: RecordKind,
        id: Option<&str>,
        script: &str,
        input: &Value,
        timeout: Duration,
    ) -> Result<String> {
        let payload = serde_json::to_string(input)?;
        let child = Command::new(&self.exe)
            .args([
                "-NoLogo",
                "-NoProfile",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Bypass",
                "-EncodedCommand",
            ])
            .arg(encode_script(script))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Unavailable {
                message: format!("failed to start {}: {e}", self.exe.display()),
            })?;

        let finished = supervise(child, payload.as_bytes(), timeout)?;
        match finished.status {
            Some(status) if status.success() => finished.fed.map(|()| finished.stdout),
            Some(_) => Err(Error::from_host_output(&finished.stderr, kind, id)),
            None => {
                log::warn!("{kind} script exceeded {}s, killed", timeout.as_secs());
                Err(Error::Timeout(timeout))
            }
        }
    }
}

/// Outcome of one script process.
struct Finished {
    /// Exit status; `None` if the deadline passed and the child was killed
    status: Option<ExitStatus>,
    /// Whether the input was handed over in full
    fed: Result<()>,
    stdout: String,
    stderr: String,
}

/// Feed `input` to a spawned child, wait for it and collect its output.
///
/// The child is always reaped and both output pipes are drained, also when
/// the input cannot be written because the script exited early.
fn supervise(mut child: Child, input: &[u8], timeout: Duration) -> Result<Finished> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let fed = child
        .stdin
        .take()
        .map_or(Ok(()), |mut stdin| stdin.write_all(input))
        .map_err(Error::from);
    if let Err(e) = &fed {
        log::debug!("Script did not take its input: {e}");
    }
    let status = wait_with_timeout(&mut child, timeout);

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    Ok(Finished {
        status: status?,
        fed,
        stdout,
        stderr,
    })
}

impl Backend for PowerShellBackend {
    fn is_available(&self, kind: RecordKind) -> bool {
        let input = json!({"kind": kind});
        match self.run(kind, None, &scripts::probe(), &input, READ_TIMEOUT) {
            Ok(out) => out.trim() == "true",
            Err(e) => {
                log::debug!("{kind} probe failed: {e}");
                false
            }
        }
    }

    fn is_elevated(&self) -> bool {
        self.run(
            RecordKind::Account,
            None,
            &scripts::elevated(),
            &Value::Null,
            READ_TIMEOUT,
        )
        .is_ok_and(|out| out.trim() == "true")
    }

    fn list(&self, kind: RecordKind, filter: &ListFilter) -> Result<Vec<Record>> {
        let input = json!({"ids": filter.ids, "enumerate": filter.enumerate});
        let out = self.run(kind, None, &scripts::script(kind, Verb::List), &input, READ_TIMEOUT)?;
        let (records, opaque) = parse_records(kind, &out)?;
        screen(kind, filter, records, opaque)
    }

    fn put(&self, record: &Record, timeout: Duration) -> Result<()> {
        let kind = record.kind();
        let mut input = serde_json::to_value(record)?;
        if let Some(object) = input.as_object_mut() {
            object.shift_remove("record");
        }
        self.run(
            kind,
            Some(record.id()),
            &scripts::script(kind, Verb::Put),
            &input,
            timeout,
        )?;
        Ok(())
    }

    fn remove(&self, kind: RecordKind, id: &str, timeout: Duration) -> Result<()> {
        self.run(
            kind,
            Some(id),
            &scripts::script(kind, Verb::Remove),
            &json!({"id": id}),
            timeout,
        )?;
        Ok(())
    }
}

/// Encode a script for `-EncodedCommand` (base64 of UTF-16LE).
fn encode_script(script: &str) -> String {
    let bytes: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    STANDARD.encode(bytes)
}

fn drain(pipe: Option<impl Read + Send + 'static>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut out);
        }
        out
    })
}

/// Wait for exit; `None` if the deadline passed and the child was killed.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        }
    }
}

/// Parse a script's JSON array output.
///
/// Items the scripts flag as `unsupported`, and items that do not parse into
/// a record, come back as [`Opaque`] objects rather than being dropped.
fn parse_records(kind: RecordKind, out: &str) -> Result<(Vec<Record>, Vec<Opaque>)> {
    let trimmed = out.trim();
    if trimmed.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    let items = match serde_json::from_str::<Value>(trimmed)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    };

    let mut records = Vec::with_capacity(items.len());
    let mut opaque = Vec::new();
    for item in items {
        let Value::Object(mut object) = item else {
            continue;
        };
        object.retain(|_, v| !v.is_null());
        let Some(id) = object.get("id").and_then(Value::as_str).map(String::from) else {
            log::debug!("Skipping {kind} without an id");
            continue;
        };
        if let Some(reason) = object.get("unsupported").and_then(Value::as_str) {
            opaque.push(Opaque {
                kind,
                id,
                reason: reason.to_string(),
            });
            continue;
        }
        match Record::from_object(kind, object) {
            Ok(record) => records.push(record),
            Err(e) => opaque.push(Opaque {
                kind,
                id,
                reason: e.to_string(),
            }),
        }
    }
    Ok((records, opaque))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_script_is_utf16le_base64() {
        // "ab" -> 61 00 62 00
        assert_eq!(encode_script("ab"), "YQBiAA==");
    }

    #[test]
    fn test_parse_records_shapes() {
        assert!(parse_records(RecordKind::Service, "").unwrap().0.is_empty());
        assert!(parse_records(RecordKind::Service, "null").unwrap().0.is_empty());

        let (single, opaque) = parse_records(
            RecordKind::Service,
            r#"{"id":"Spooler","start_type":"automatic","state":"running","display_name":null}"#,
        )
        .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].id(), "Spooler");
        assert!(opaque.is_empty());
    }

    #[test]
    fn test_parse_records_keeps_unrepresentable_as_opaque() {
        let out = r#"[
            {"id":"HKCU\\Software\\Acme\\Ok","type":"dword","data":1},
            {"id":"HKCU\\Software\\Acme\\Bad","type":"dword","data":"text"},
            {"id":"HKCU\\Software\\Acme\\Legacy","unsupported":"registry type MultiString"}
        ]"#;
        let (records, opaque) = parse_records(RecordKind::RegistryValue, out).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id(), r"HKCU\Software\Acme\Ok");

        let ids: Vec<&str> = opaque.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec![r"HKCU\Software\Acme\Bad", r"HKCU\Software\Acme\Legacy"]);
        assert_eq!(opaque[1].reason, "registry type MultiString");

        let filter = ListFilter::ids([r"HKCU\Software\Acme\Legacy"]);
        assert!(matches!(
            screen(RecordKind::RegistryValue, &filter, records, opaque),
            Err(Error::Unrepresentable(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_child_that_ignores_its_input_is_reaped() {
        let child = Command::new("sh")
            .args(["-c", "echo refused >&2; exit 3"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let input = vec![b'x'; 1 << 20];

        let finished = supervise(child, &input, Duration::from_secs(10)).unwrap();
        assert_eq!(finished.status.and_then(|s| s.code()), Some(3));
        assert!(finished.fed.is_err());
        assert_eq!(finished.stderr.trim(), "refused");
    }

    #[test]
    fn test_lossy_kinds_report_unsupported_objects() {
        for kind in [RecordKind::RegistryValue, RecordKind::FirewallRule, RecordKind::PathAcl] {
            assert!(scripts::script(kind, Verb::List).contains("unsupported ="), "{kind}");
        }
        for verb in [Verb::Put, Verb::Remove] {
            let script = scripts::script(RecordKind::FirewallRule, verb);
            assert!(script.contains("Get-RulesNamed $in.id"), "{verb:?}");
            assert!(!script.contains("-DisplayName $in.id"), "{verb:?}");
        }
    }

    #[test]
    fn test_every_kind_has_scripts() {
        for kind in RecordKind::ALL {
            for verb in [Verb::List, Verb::Put, Verb::Remove] {
                let script = scripts::script(kind, verb);
                assert!(script.contains("ConvertFrom-Json"), "{kind} {verb:?}");
                assert!(script.contains("exit 1"), "{kind} {verb:?}");
            }
        }
    }
}

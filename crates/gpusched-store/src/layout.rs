//! On-disk layout of the pool
//!
//! The state file holds one JSON object with six parallel arrays, one entry
//! per slot. Keys are written in sorted order with four-space indentation so
//! the file stays readable by hand.

use chrono::NaiveDateTime;
use gpusched_core::{
    GpuschedError, GpuschedResult, Occupant, ResourcePool, ResourceSlot, TIMESTAMP_FORMAT,
};
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use tracing::debug;

/// Parallel-array form of a [`ResourcePool`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedPool {
    pub avail: Vec<bool>,
    pub gpu_name: Vec<Option<String>>,
    pub task: Vec<Option<Vec<String>>>,
    pub task_pid: Vec<Option<u32>>,
    pub task_start: Vec<Option<String>>,
    pub user: Vec<Option<String>>,
}

impl From<&ResourcePool> for PersistedPool {
    fn from(pool: &ResourcePool) -> Self {
        let mut out = PersistedPool::default();
        for slot in pool.slots() {
            let occ = slot.occupant.as_ref();
            out.avail.push(slot.available);
            out.gpu_name.push(occ.map(|o| o.label.clone()));
            out.task.push(occ.map(|o| o.task.clone()));
            out.task_pid.push(occ.map(|o| o.pid));
            out.task_start
                .push(occ.map(|o| o.started_at.format(TIMESTAMP_FORMAT).to_string()));
            out.user.push(occ.map(|o| o.user.clone()));
        }
        out
    }
}

impl TryFrom<PersistedPool> for ResourcePool {
    type Error = GpuschedError;

    fn try_from(p: PersistedPool) -> GpuschedResult<Self> {
        let n = p.avail.len();
        let lengths = [
            ("gpu_name", p.gpu_name.len()),
            ("task", p.task.len()),
            ("task_pid", p.task_pid.len()),
            ("task_start", p.task_start.len()),
            ("user", p.user.len()),
        ];
        for (key, len) in lengths {
            if len != n {
                return Err(GpuschedError::Storage(format!(
                    "{} slots in avail, {} in {}",
                    n, len, key
                )));
            }
        }

        let mut slots = Vec::with_capacity(n);
        let columns = p
            .avail
            .into_iter()
            .zip(p.gpu_name)
            .zip(p.task)
            .zip(p.task_pid)
            .zip(p.task_start)
            .zip(p.user);

        for (index, (((((available, label), task), pid), start), user)) in columns.enumerate() {
            let occupant = match (user, task, pid, start, label) {
                (Some(user), Some(task), Some(pid), Some(start), Some(label)) if !available => {
                    let started_at = NaiveDateTime::parse_from_str(&start, TIMESTAMP_FORMAT)
                        .map_err(|e| {
                            GpuschedError::Storage(format!(
                                "slot {} has a bad start time '{}': {}",
                                index, start, e
                            ))
                        })?;
                    Some(Occupant {
                        user,
                        task,
                        pid,
                        started_at,
                        label,
                    })
                }
                (None, None, None, None, None) => None,
                _ => {
                    debug!(slot = index, "Dropping partial occupant record");
                    None
                }
            };
            slots.push(ResourceSlot {
                available,
                occupant,
            });
        }

        Ok(ResourcePool::from_slots(slots))
    }
}

/// Serialize a pool into the state file format
pub fn encode(pool: &ResourcePool) -> GpuschedResult<Vec<u8>> {
    let persisted = PersistedPool::from(pool);
    let mut buf = Vec::new();
    let mut ser =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    persisted.serialize(&mut ser)?;
    Ok(buf)
}

/// Parse the state file format
pub fn decode(bytes: &[u8]) -> GpuschedResult<ResourcePool> {
    let persisted: PersistedPool = serde_json::from_slice(bytes)?;
    ResourcePool::try_from(persisted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_decode_status_fixture() {
        let json = r#"{
            "avail": [true, false, true],
            "gpu_name": [null, "cuda1", null],
            "task": [null, ["run.sh"], null],
            "task_pid": [null, 1234, null],
            "task_start": [null, "2024-05-01 12:30:00", null],
            "user": [null, "alice", null]
        }"#;

        let pool = decode(json.as_bytes()).unwrap();
        assert_eq!(pool.availability(), vec![true, false, true]);

        let occ = pool.get(1).unwrap().occupant.as_ref().unwrap();
        assert_eq!(occ.user, "alice");
        assert_eq!(occ.task, vec!["run.sh".to_string()]);
        assert_eq!(occ.pid, 1234);
        assert_eq!(
            occ.started_at,
            NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(12, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_encode_keeps_parallel_arrays() {
        let pool = ResourcePool::new(2, &[1]);
        let bytes = encode(&pool).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["avail"], serde_json::json!([true, false]));
        for key in ["gpu_name", "task", "task_pid", "task_start", "user"] {
            assert_eq!(value[key], serde_json::json!([null, null]), "key {}", key);
        }
        assert!(String::from_utf8(bytes).unwrap().contains("\n    \"avail\""));
    }

    #[test]
    fn test_decode_rejects_ragged_arrays() {
        let json = r#"{"avail": [true, true], "gpu_name": [null], "task": [null, null],
            "task_pid": [null, null], "task_start": [null, null], "user": [null, null]}"#;
        let err = decode(json.as_bytes()).unwrap_err();
        assert!(matches!(err, GpuschedError::Storage(_)));
    }

    #[test]
    fn test_decode_rejects_bad_timestamp() {
        let json = r#"{"avail": [false], "gpu_name": ["cuda0"], "task": [["a"]],
            "task_pid": [7], "task_start": ["yesterday"], "user": ["bob"]}"#;
        let err = decode(json.as_bytes()).unwrap_err();
        assert!(matches!(err, GpuschedError::Storage(_)));
    }

    #[test]
    fn test_partial_occupant_reads_as_reserved() {
        let json = r#"{"avail": [false], "gpu_name": [null], "task": [null],
            "task_pid": [99], "task_start": [null], "user": [null]}"#;
        let pool = decode(json.as_bytes()).unwrap();
        assert!(pool.get(0).unwrap().is_reserved());
    }
}

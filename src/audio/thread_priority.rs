// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Default priority for the mixer thread when KEYASMR_THREAD_PRIORITY is unset.
const DEFAULT_MIXER_THREAD_PRIORITY: u8 = 70;

/// Reads KEYASMR_THREAD_PRIORITY (0-99). Invalid values fall back to the default.
pub fn mixer_thread_priority() -> u8 {
    std::env::var("KEYASMR_THREAD_PRIORITY")
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_MIXER_THREAD_PRIORITY)
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Returns whether we should attempt RT (SCHED_FIFO) scheduling for the mixer thread.
/// Default: enabled. Opt out with KEYASMR_DISABLE_RT_AUDIO=1.
pub fn rt_audio_enabled() -> bool {
    !env_flag("KEYASMR_DISABLE_RT_AUDIO")
}

/// Raises the priority of the calling thread. Failures are logged; audio still plays
/// at normal priority.
pub fn configure_mixer_thread_priority(priority: u8, rt_audio: bool) {
    let priority = match ThreadPriorityValue::try_from(priority) {
        Ok(priority) => priority,
        Err(e) => {
            warn!(priority, error = ?e, "Invalid mixer thread priority");
            return;
        }
    };
    let tp = ThreadPriority::Crossplatform(priority);
    if let Err(e) = set_current_thread_priority(tp) {
        warn!(error = ?e, "Failed to raise mixer thread priority");
    }

    #[cfg(unix)]
    if rt_audio {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        let tid = thread_native_id();
        match set_thread_priority_and_policy(
            tid,
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => {
                info!("Enabled RT SCHED_FIFO for mixer thread");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to set RT SCHED_FIFO for mixer thread"
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = rt_audio;
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn with_env<T>(name: &str, value: Option<&str>, f: impl FnOnce() -> T) -> T {
        let original = std::env::var(name).ok();
        match value {
            Some(value) => std::env::set_var(name, value),
            None => std::env::remove_var(name),
        }
        let result = f();
        match original {
            Some(val) => std::env::set_var(name, val),
            None => std::env::remove_var(name),
        }
        result
    }

    #[test]
    #[serial]
    fn test_priority_env() {
        let priority = with_env("KEYASMR_THREAD_PRIORITY", Some("42"), mixer_thread_priority);
        assert_eq!(priority, 42);

        let priority = with_env("KEYASMR_THREAD_PRIORITY", Some("250"), mixer_thread_priority);
        assert_eq!(priority, DEFAULT_MIXER_THREAD_PRIORITY);

        let priority = with_env("KEYASMR_THREAD_PRIORITY", None, mixer_thread_priority);
        assert_eq!(priority, DEFAULT_MIXER_THREAD_PRIORITY);
    }

    #[test]
    #[serial]
    fn test_rt_audio_flag() {
        assert!(!with_env("KEYASMR_DISABLE_RT_AUDIO", Some("yes"), rt_audio_enabled));
        assert!(!with_env("KEYASMR_DISABLE_RT_AUDIO", Some("1"), rt_audio_enabled));
        assert!(with_env("KEYASMR_DISABLE_RT_AUDIO", Some("0"), rt_audio_enabled));
        assert!(with_env("KEYASMR_DISABLE_RT_AUDIO", None, rt_audio_enabled));
    }
}

use crate::models::ScheduleEntry;
use std::time::Duration;

pub const DEFAULT_SLOT: Duration = Duration::from_secs(30);

/// Staggered schedule: host `i` (lexicographic order) starts at `i * slot`
/// and runs `(n - i) * slot`, so every host stops at `n * slot` and the
/// background load grows by one host per slot.
///
/// The caller has already removed excluded hosts. An empty input yields an
/// empty schedule.
pub fn plan<S: AsRef<str>>(hosts: &[S], slot: Duration) -> Vec<ScheduleEntry> {
    let mut names: Vec<&str> = hosts.iter().map(AsRef::as_ref).collect();
    names.sort_unstable();
    names.dedup();

    let n = names.len() as u32;
    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let i = i as u32;
            ScheduleEntry {
                hostname: name.to_string(),
                start_offset: slot * i,
                run_duration: slot * (n - i),
            }
        })
        .collect()
}

/// Wall-clock length of a schedule.
pub fn total_duration<'a, I>(schedule: I) -> Duration
where
    I: IntoIterator<Item = &'a ScheduleEntry>,
{
    schedule
        .into_iter()
        .map(|e| e.start_offset + e.run_duration)
        .max()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(entries: &[ScheduleEntry]) -> Vec<(&str, u64, u64)> {
        entries
            .iter()
            .map(|e| (e.hostname.as_str(), e.start_offset.as_secs(), e.run_duration.as_secs()))
            .collect()
    }

    #[test]
    fn two_hosts() {
        let schedule = plan(&["A", "B"], DEFAULT_SLOT);
        assert_eq!(secs(&schedule), vec![("A", 0, 60), ("B", 30, 30)]);
    }

    #[test]
    fn three_hosts() {
        let schedule = plan(&["A", "B", "C"], DEFAULT_SLOT);
        assert_eq!(secs(&schedule), vec![("A", 0, 90), ("B", 30, 60), ("C", 60, 30)]);
        assert_eq!(total_duration(&schedule), Duration::from_secs(90));
    }

    #[test]
    fn input_order_does_not_matter() {
        let schedule = plan(&["h3", "h1", "h2"], Duration::from_secs(10));
        assert_eq!(secs(&schedule), vec![("h1", 0, 30), ("h2", 10, 20), ("h3", 20, 10)]);
    }

    #[test]
    fn offsets_non_decreasing_and_all_end_together() {
        let hosts: Vec<String> = (1..=9).map(|i| format!("h{i}")).collect();
        let slot = Duration::from_millis(250);
        let schedule = plan(&hosts, slot);

        assert!(schedule.windows(2).all(|w| w[0].start_offset <= w[1].start_offset));
        for entry in &schedule {
            assert_eq!(entry.start_offset + entry.run_duration, slot * 9);
        }
    }

    #[test]
    fn empty_input_gives_empty_schedule() {
        let none: [&str; 0] = [];
        assert!(plan(&none, DEFAULT_SLOT).is_empty());
        assert_eq!(total_duration(&[] as &[ScheduleEntry]), Duration::ZERO);
    }
}

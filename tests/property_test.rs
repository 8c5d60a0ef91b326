//! Property tests for the id codec and the job state machine.

use proptest::prelude::*;

use ump_gateway::domain::models::{Job, JobStatus, ProcessId};

fn id_component() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_-]{1,24}"
}

fn any_status() -> impl Strategy<Value = JobStatus> {
    prop_oneof![
        Just(JobStatus::Accepted),
        Just(JobStatus::Running),
        Just(JobStatus::Successful),
        Just(JobStatus::Failed),
        Just(JobStatus::Dismissed),
    ]
}

proptest! {
    /// `parse(compose(p, b)) == (p, b)` for all valid components.
    #[test]
    fn codec_round_trips(provider in id_component(), bare in id_component()) {
        let id = ProcessId::new(&provider, &bare).unwrap();
        let parsed = ProcessId::parse(&id.to_string()).unwrap();
        prop_assert_eq!(parsed.provider(), provider.as_str());
        prop_assert_eq!(parsed.bare(), bare.as_str());
    }

    /// Ids with characters outside the component grammar never parse.
    #[test]
    fn invalid_characters_never_parse(s in "[^A-Za-z0-9_:-]{1,8}") {
        let with_prefix = format!("ms1:{}", s);
        let with_suffix = format!("{}:square", s);
        prop_assert!(ProcessId::parse(&with_prefix).is_err());
        prop_assert!(ProcessId::parse(&with_suffix).is_err());
    }

    /// Once a job reaches a terminal status, no sequence of derived
    /// snapshots moves it anywhere else.
    #[test]
    fn terminal_states_are_absorbing(statuses in proptest::collection::vec(any_status(), 1..12)) {
        let mut job = Job::new(ProcessId::new("ms1", "square").unwrap(), None);
        let mut terminal: Option<JobStatus> = None;

        for status in statuses {
            let mut si = job.status_info.clone();
            si.status = status;
            let _ = job.apply_status_info(si);

            if let Some(reached) = terminal {
                prop_assert_eq!(job.status, reached);
            } else if job.status.is_terminal() {
                terminal = Some(job.status);
                prop_assert!(job.finished.is_some());
            }
        }
    }

    /// Timestamp ordering holds for every path to a terminal state.
    #[test]
    fn terminal_jobs_have_ordered_timestamps(
        via_running in any::<bool>(),
        end in prop_oneof![
            Just(JobStatus::Successful),
            Just(JobStatus::Failed),
            Just(JobStatus::Dismissed)
        ],
    ) {
        let mut job = Job::new(ProcessId::new("ms1", "square").unwrap(), None);
        if via_running {
            let mut si = job.status_info.clone();
            si.status = JobStatus::Running;
            job.apply_status_info(si).unwrap();
        }
        let mut si = job.status_info.clone();
        si.status = end;
        job.apply_status_info(si).unwrap();

        let started = job.started.unwrap();
        let finished = job.finished.unwrap();
        prop_assert!(job.created <= started);
        prop_assert!(started <= finished);
    }
}

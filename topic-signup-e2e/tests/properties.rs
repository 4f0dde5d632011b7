// cargo test -p topic-signup-e2e --test properties

use std::collections::BTreeSet;

use proptest::prelude::*;
use topic_signup_core::{SignUpSheet, SignupOutcome, TeamId, TopicId, TopicOccupancy};
use topic_signup_e2e::{at, SheetBuilder};

const TEAMS: i32 = 6;
const TOPICS: i32 = 3;

#[derive(Debug, Clone)]
enum Op {
    SignUp { team: i32, topic: i32 },
    Drop { team: i32, topic: i32 },
    Grow { topic: i32, by: u32 },
    Rank { team: i32, topics: Vec<i32> },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1..=TEAMS, 1..=TOPICS).prop_map(|(team, topic)| Op::SignUp { team, topic }),
        2 => (1..=TEAMS, 1..=TOPICS).prop_map(|(team, topic)| Op::Drop { team, topic }),
        1 => (1..=TOPICS, 0..3_u32).prop_map(|(topic, by)| Op::Grow { topic, by }),
        1 => (1..=TEAMS, prop::collection::vec(1..=TOPICS, 0..4))
            .prop_map(|(team, topics)| Op::Rank { team, topics }),
    ]
}

fn sheet(capacities: &[u32]) -> SignUpSheet {
    let mut builder = SheetBuilder::new(1);
    for (id, &max_choosers) in (1..).zip(capacities) {
        builder = builder.topic(id, max_choosers);
    }
    for team in 1..=TEAMS {
        builder = builder.team(team, &[team]);
    }
    builder.build().unwrap()
}

fn apply(sheet: &mut SignUpSheet, op: &Op) -> bool {
    let now = at(1, 9);
    match op {
        Op::SignUp { team, topic } => sheet.sign_up(TeamId(*team), TopicId(*topic), now).is_ok(),
        Op::Drop { team, topic } => sheet.drop_topic(TeamId(*team), TopicId(*topic), now).is_ok(),
        Op::Grow { topic, by } => {
            let Some(current) = sheet.topic(TopicId(*topic)) else {
                return false;
            };
            let mut draft = current.draft();
            draft.max_choosers += by;
            sheet.update_topic(TopicId(*topic), draft).is_ok()
        }
        Op::Rank { team, topics } => {
            let ordered = topics.iter().copied().map(TopicId).collect::<Vec<_>>();
            sheet.set_priorities(TeamId(*team), &ordered).is_ok()
        }
    }
}

fn check_invariants(occupancy: &[TopicOccupancy]) -> Result<(), TestCaseError> {
    let mut confirmed = BTreeSet::new();
    for topic in occupancy {
        prop_assert!(topic.slots_filled() <= topic.max_choosers);
        for team in &topic.confirmed {
            prop_assert!(confirmed.insert(*team), "{team} confirmed twice");
        }
        let waiting = topic.waitlist.iter().collect::<BTreeSet<_>>();
        prop_assert_eq!(waiting.len(), topic.waitlist.len());
    }
    for topic in occupancy {
        for team in &topic.waitlist {
            prop_assert!(!confirmed.contains(team), "{team} confirmed yet waiting");
        }
    }
    Ok(())
}

proptest! {
    /// No sequence of operations overbooks a topic or confirms a team twice.
    #[test]
    fn capacity_and_single_confirmation_hold(
        capacities in prop::collection::vec(0..3_u32, TOPICS as usize),
        ops in prop::collection::vec(op(), 1..60),
    ) {
        let mut sheet = sheet(&capacities);
        for op in &ops {
            let before = sheet.occupancy();
            if !apply(&mut sheet, op) {
                prop_assert_eq!(sheet.occupancy(), before, "failed {:?} changed state", op);
            }
            check_invariants(&sheet.occupancy())?;
            prop_assert!(sheet.verify().is_ok());
        }
    }

    /// Both drop entry points hand the vacated slot to the same team.
    #[test]
    fn drop_paths_agree(
        signups in prop::collection::vec((1..=TEAMS, 1..=TOPICS), 1..20),
        team in 1..=TEAMS,
        topic in 1..=TOPICS,
    ) {
        let mut by_student = sheet(&[1, 1, 2]);
        for (signer, choice) in signups {
            let _ = by_student.sign_up(TeamId(signer), TopicId(choice), at(1, 9));
        }
        let mut by_instructor = by_student.clone();

        let student = by_student.drop_topic(TeamId(team), TopicId(topic), at(2, 9));
        let instructor = by_instructor.drop_as_instructor(TeamId(team), TopicId(topic), at(2, 9));

        prop_assert_eq!(student, instructor);
        prop_assert_eq!(by_student.occupancy(), by_instructor.occupancy());
    }

    /// Waitlisted teams are promoted strictly in signup order.
    #[test]
    fn promotion_is_first_in_first_out(waiting in 1..TEAMS) {
        let mut sheet = sheet(&[1]);
        let now = at(1, 9);
        for team in 1..=waiting + 1 {
            let applied = sheet.sign_up(TeamId(team), TopicId(1), now).unwrap();
            let expected = if team == 1 {
                SignupOutcome::Confirmed
            } else {
                SignupOutcome::Waitlisted { position: usize::try_from(team - 1).unwrap() }
            };
            prop_assert_eq!(applied.outcome, expected);
        }

        let mut holder = TeamId(1);
        for next in 2..=waiting + 1 {
            let applied = sheet.drop_topic(holder, TopicId(1), now).unwrap();
            prop_assert_eq!(
                applied.promoted().collect::<Vec<_>>(),
                vec![(TeamId(next), TopicId(1))]
            );
            holder = TeamId(next);
        }
        prop_assert_eq!(sheet.confirmed_topic(holder), Some(TopicId(1)));
    }
}

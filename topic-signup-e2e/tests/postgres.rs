// podman run --rm --detach --name postgres-testing --env POSTGRES_HOST_AUTH_METHOD=trust --publish 5432:5432 docker.io/postgres
// diesel migration run --database-url postgres://postgres@localhost/signup
// SIGNUP_DATABASE_URL=postgres://postgres@localhost/signup cargo test -p topic-signup-e2e --test postgres -- --ignored

use std::time::{SystemTime, UNIX_EPOCH};

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use topic_signup_config::get_config;
use topic_signup_core::{
    AssignmentId, SignupOutcome, SignupService, SignupStore, Topic, TopicDraft, TopicId,
    Transition, UserId,
};
use topic_signup_database::models::SignUpTopicRow;
use topic_signup_database::schema::{assignments, participants, sign_up_topics, users};
use topic_signup_database::PgStore;
use topic_signup_e2e::at;
use topic_signup_telemetry::setup_test_telemetry;

struct Seeded {
    assignment: AssignmentId,
    topic: TopicId,
    users: Vec<UserId>,
}

async fn seed(connection: &mut AsyncPgConnection) -> Seeded {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let assignment = diesel::insert_into(assignments::table)
        .values((
            assignments::name.eq(format!("wiki {suffix}")),
            assignments::max_team_size.eq(2),
            assignments::rounds_of_reviews.eq(2),
        ))
        .returning(assignments::id)
        .get_result::<i32>(connection)
        .await
        .unwrap();
    let mut seeded_users = vec![];
    for name in ["ada", "brook", "cyd"] {
        let user = diesel::insert_into(users::table)
            .values(users::name.eq(format!("{name}-{suffix}")))
            .returning(users::id)
            .get_result::<i32>(connection)
            .await
            .unwrap();
        diesel::insert_into(participants::table)
            .values((
                participants::assignment_id.eq(assignment),
                participants::user_id.eq(user),
            ))
            .execute(connection)
            .await
            .unwrap();
        seeded_users.push(UserId(user));
    }
    let topic = diesel::insert_into(sign_up_topics::table)
        .values((
            sign_up_topics::assignment_id.eq(assignment),
            sign_up_topics::topic_identifier.eq("E1"),
            sign_up_topics::topic_name.eq("Wiki textbook"),
            sign_up_topics::max_choosers.eq(1),
        ))
        .returning(sign_up_topics::id)
        .get_result::<i32>(connection)
        .await
        .unwrap();
    Seeded {
        assignment: AssignmentId(assignment),
        topic: TopicId(topic),
        users: seeded_users,
    }
}

async fn clean_up(connection: &mut AsyncPgConnection, seeded: &Seeded) {
    diesel::delete(assignments::table.find(seeded.assignment.get()))
        .execute(connection)
        .await
        .unwrap();
    let ids = seeded.users.iter().map(|user| user.get()).collect::<Vec<_>>();
    diesel::delete(users::table.filter(users::id.eq_any(ids)))
        .execute(connection)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "needs a migrated Postgres database"]
async fn committed_transitions_reload_identically() {
    setup_test_telemetry();
    let config = get_config().unwrap();
    let store = PgStore::from_config(&config).unwrap();
    let pool = topic_signup_database::get_database_connection(&config.database_url, 1).unwrap();
    let mut connection = pool.get().await.unwrap();
    let seeded = seed(&mut connection).await;
    let (assignment, topic) = (seeded.assignment, seeded.topic);
    let [ada, brook, cyd] = [seeded.users[0], seeded.users[1], seeded.users[2]];

    let service = SignupService::new(store.clone());
    let now = at(1, 9);
    for (user, expected) in [
        (ada, SignupOutcome::Confirmed),
        (brook, SignupOutcome::Waitlisted { position: 1 }),
        (cyd, SignupOutcome::Waitlisted { position: 2 }),
    ] {
        let receipt = service.sign_up(assignment, user, topic, now).await.unwrap();
        assert_eq!(receipt.outcome, expected);
    }

    // a suggestion private to ada's team, inserted the way the suggestion form does
    let ada_team = service
        .snapshot(assignment)
        .await
        .unwrap()
        .team_of(ada)
        .unwrap();
    let suggestion = store.allocate_topic_id(assignment).await.unwrap();
    let mut private = Topic::from_draft(
        suggestion,
        assignment,
        TopicDraft {
            identifier: "S1".to_owned(),
            name: "Ada's proposal".to_owned(),
            max_choosers: 1,
            ..TopicDraft::default()
        },
    );
    private.private_to = Some(ada_team);
    diesel::insert_into(sign_up_topics::table)
        .values(SignUpTopicRow::try_from(&private).unwrap())
        .execute(&mut connection)
        .await
        .unwrap();
    service.evict(assignment).await;

    // moving ada's confirmed row and promoting brook must respect the one-confirmed index
    let approved = service
        .approve_suggested_topic(assignment, ada_team, suggestion)
        .await
        .unwrap();
    assert!(approved
        .transitions
        .iter()
        .any(|transition| matches!(transition, Transition::Moved { .. })));
    service
        .drop_topic(assignment, brook, topic, at(2, 9))
        .await
        .unwrap();
    service
        .set_priorities(assignment, cyd, &[suggestion, topic])
        .await
        .unwrap();

    let cached = service.snapshot(assignment).await.unwrap();
    service.evict(assignment).await;
    let reloaded = service.snapshot(assignment).await.unwrap();
    assert_eq!(reloaded.occupancy(), cached.occupancy());
    assert_eq!(reloaded.records(), cached.records());
    let cyd_team = reloaded.team_of(cyd).unwrap();
    assert_eq!(reloaded.bids(cyd_team), cached.bids(cyd_team));
    assert_eq!(reloaded.confirmed_topic(ada_team), Some(suggestion));
    assert_eq!(reloaded.confirmed_topic(cyd_team), Some(topic));
    assert!(reloaded.topic(suggestion).unwrap().is_public());

    clean_up(&mut connection, &seeded).await;
}

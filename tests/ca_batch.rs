//! Test the background jobs that update many CAs.

use rpki_ca_engine::api::ca::CaName;
use rpki_ca_engine::server::background::BackgroundJob;
use rpki_ca_engine::server::command::Command;
use rpki_ca_engine::test;

mod common;


//------------ Test Functions ------------------------------------------------

/// The production CA is updated first, then its members in batches.
#[tokio::test]
async fn update_members_in_batches() {
    let mut config = test::config();
    config.ca_update_batch_size = 2;
    config.batch_parallelism = 1;
    config.invariant_checking_enabled = true;
    let server = common::TestEngine::with_config(config);
    let (_, production) = server.hierarchy().await;

    let members: Vec<_> = (0..4).map(|i| {
        server.create_member(
            &format!("CN=member-{i}"), &format!("10.{i}.0.0/16"), production
        )
    }).collect();
    for i in 0..4 {
        server.entitle(&format!("CN=member-{i}"), &format!("10.{i}.0.0/20"));
    }

    let update = BackgroundJob::AllCaCertificateUpdate;
    assert_eq!(server.engine.run_job(update, test::time(1)).await.unwrap(), 2);
    assert_eq!(server.engine.run_job(update, test::time(2)).await.unwrap(), 2);
    assert_eq!(server.engine.run_job(update, test::time(3)).await.unwrap(), 0);
    for (i, member) in members.iter().enumerate() {
        assert_eq!(
            server.certified_resources(*member),
            Some(test::resources(&format!("10.{i}.0.0/20")))
        );
    }
    assert_eq!(server.engine.engine_metrics().invariant_violations(), 0);
}

/// A production CA that grows is updated before its members.
#[tokio::test]
async fn production_before_members() {
    let server = common::TestEngine::new();
    let (_, production) = server.hierarchy().await;
    let member = server.create_member("CN=member", "10.1.0.0/16", production);

    // The member may have more than the production CA holds right now.
    server.entitle("CN=member", "10.1.0.0/16, 172.16.0.0/12");
    server.entitle(
        &server.engine.config().production_ca_name,
        "10.0.0.0/8, 172.16.0.0/12, 2001:db8::/32"
    );

    let update = BackgroundJob::AllCaCertificateUpdate;
    assert_eq!(server.engine.run_job(update, test::time(1)).await.unwrap(), 2);
    assert_eq!(
        server.certified_resources(member),
        Some(test::resources("10.1.0.0/16, 172.16.0.0/12"))
    );
}

/// Nothing happens without the production CA or while stopping.
#[tokio::test]
async fn skip_update() {
    let server = common::TestEngine::new();
    let all_resources = server.create_all_resources_ca();
    let update = BackgroundJob::AllCaCertificateUpdate;
    assert_eq!(server.engine.run_job(update, test::time(1)).await.unwrap(), 0);

    let production = server.create_production_ca(all_resources).await;
    assert!(server.certified_resources(production).is_some());

    let member = server.create_member("CN=member", "10.1.0.0/16", production);
    server.entitle("CN=member", "10.1.0.0/20");
    server.engine.stop();
    assert_eq!(server.engine.run_job(update, test::time(2)).await.unwrap(), 0);
    assert_eq!(
        server.certified_resources(member), Some(test::resources("10.1.0.0/16"))
    );
}

/// Resources still held by grandchildren stay with their parent.
#[tokio::test]
async fn keep_resources_of_children() {
    let server = common::TestEngine::new();
    let (_, production) = server.hierarchy().await;

    server.entitle("CN=intermediate", "10.2.0.0/16");
    let intermediate = server.engine.next_ca_id();
    server.engine.execute(
        &Command::create_intermediate_ca(
            intermediate, CaName::from("CN=intermediate"), production
        ),
        &server.user(0)
    ).unwrap();
    server.create_member("CN=hosted", "10.2.1.0/24", intermediate);

    server.entitle("CN=intermediate", "10.2.0.0/24");
    assert!(server.update_all_incoming(intermediate, 1));
    assert_eq!(
        server.certified_resources(intermediate),
        Some(test::resources("10.2.0.0/24, 10.2.1.0/24"))
    );
    assert_eq!(server.engine.engine_metrics().overclaiming_cas(), 1);

    server.entitle("CN=intermediate", "10.2.0.0/16");
    assert!(server.update_all_incoming(intermediate, 2));
    assert_eq!(server.engine.engine_metrics().overclaiming_cas(), 0);
}

//! Test certifying CAs below the production CA.

use rpki_ca_engine::api::ca::{CaName, CaType};
use rpki_ca_engine::commons::error::Error;
use rpki_ca_engine::server::command::{Command, NonHostedPublicKey};
use rpki_ca_engine::test;

mod common;


//------------ Test Functions ------------------------------------------------

/// The trust anchor certifies the all resources CA, which in turn
/// certifies the production CA with what it is entitled to.
#[tokio::test]
async fn bootstrap_hierarchy() {
    let server = common::TestEngine::new();
    let (all_resources, production) = server.hierarchy().await;

    let all = server.engine.ca(all_resources).unwrap();
    assert_eq!(all.ca_type(), CaType::AllResources);
    assert!(all.managed().unwrap().current_key().is_some());
    assert!(server.engine.trust_anchor_request(all_resources).unwrap().is_none());

    let prod = server.engine.ca(production).unwrap();
    assert_eq!(prod.ca_type(), CaType::Root);
    assert_eq!(prod.parent(), Some(all_resources));
    assert_eq!(
        server.certified_resources(production),
        Some(test::resources(common::PRODUCTION_RESOURCES))
    );

    // The production CA has to hang below the all resources CA.
    let id = server.engine.next_ca_id();
    let err = server.engine.execute(
        &Command::create_root_ca(id, CaName::from("CN=other root"), production),
        &server.user(1)
    ).unwrap_err();
    assert!(matches!(err, Error::InvalidCaState(..)));
}

/// Members follow their entitlements: they are certified on creation,
/// shrink and grow with their resources and lose their keys when they
/// hold nothing at all.
#[tokio::test]
async fn member_follows_entitlement() {
    let server = common::TestEngine::new();
    let (_, production) = server.hierarchy().await;

    let member = server.create_member("CN=member", "10.1.0.0/16", production);
    assert_eq!(
        server.certified_resources(member), Some(test::resources("10.1.0.0/16"))
    );

    // Nothing changed, nothing to do.
    assert!(!server.update_all_incoming(member, 1));

    server.entitle("CN=member", "10.1.0.0/24, 2001:db8:1::/48");
    assert!(server.update_all_incoming(member, 2));
    assert_eq!(
        server.certified_resources(member),
        Some(test::resources("10.1.0.0/24, 2001:db8:1::/48"))
    );

    // Resources outside the parent's are left out.
    server.entitle("CN=member", "10.1.0.0/24, 192.168.0.0/16");
    assert!(server.update_all_incoming(member, 3));
    assert_eq!(
        server.certified_resources(member), Some(test::resources("10.1.0.0/24"))
    );

    let key = server.engine.ca(member).unwrap().managed().unwrap()
        .current_key().unwrap().key_id();
    server.entitle("CN=member", "");
    assert!(server.update_all_incoming(member, 4));
    let ca = server.engine.ca(member).unwrap();
    assert!(ca.managed().unwrap().keys().is_empty());
    assert!(server.archive.is_scheduled(key));
    assert!(!server.engine.ca(production).unwrap().has_current_certificate_for(key));

    // Coming back gets a fresh key.
    server.entitle("CN=member", "10.1.0.0/16");
    assert!(server.update_all_incoming(member, 5));
    let ca = server.engine.ca(member).unwrap();
    let current = ca.managed().unwrap().current_key().unwrap().key_id();
    assert_ne!(current, key);
    assert_eq!(
        server.certified_resources(member), Some(test::resources("10.1.0.0/16"))
    );
}

/// Intermediate CAs get their key from the parent exchange and can have
/// children of their own.
#[tokio::test]
async fn intermediate_and_non_hosted_members() {
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
    assert_eq!(
        server.certified_resources(intermediate),
        Some(test::resources("10.2.0.0/16"))
    );

    let hosted = server.create_member("CN=hosted", "10.2.1.0/24", intermediate);
    assert_eq!(server.engine.store().depth(hosted), 3);
    assert_eq!(
        server.certified_resources(hosted), Some(test::resources("10.2.1.0/24"))
    );

    // Hosted CAs cannot have children.
    server.entitle("CN=grandchild", "10.2.1.0/25");
    let id = server.engine.next_ca_id();
    let err = server.engine.execute(
        &Command::activate_hosted_ca(id, CaName::from("CN=grandchild"), hosted),
        &server.user(1)
    ).unwrap_err();
    assert!(matches!(err, Error::InvalidCaState(..)));
    assert!(matches!(server.engine.ca(id), Err(Error::CaNotFound(_))));

    // Non-hosted CAs bring their own public key.
    server.entitle("CN=non-hosted", "10.3.0.0/16");
    let non_hosted = server.engine.next_ca_id();
    let key = test::key_identifier(42);
    server.engine.execute(
        &Command::activate_non_hosted_ca(
            non_hosted, CaName::from("CN=non-hosted"), production,
            vec![NonHostedPublicKey {
                key,
                sia: test::sia(uuid::Uuid::new_v4(), key),
            }]
        ),
        &server.user(1)
    ).unwrap();
    let ca = server.engine.ca(non_hosted).unwrap();
    let incoming = ca.non_hosted().unwrap().key(key).unwrap().incoming().unwrap();
    assert_eq!(incoming.resources(), &test::resources("10.3.0.0/16"));
}

/// Deleting a CA revokes its certificates at the parent.
#[tokio::test]
async fn delete_member() {
    let server = common::TestEngine::new();
    let (_, production) = server.hierarchy().await;
    let member = server.create_member("CN=member", "10.1.0.0/16", production);
    let key = server.engine.ca(member).unwrap().managed().unwrap()
        .current_key().unwrap().key_id();

    // Not while it has children.
    let version = server.engine.store().get_versioned_id(production).unwrap();
    let err = server.engine.execute(
        &Command::delete_ca(version), &server.user(1)
    ).unwrap_err();
    assert!(matches!(err, Error::InvalidCaState(..)));

    let version = server.engine.store().get_versioned_id(member).unwrap();
    server.engine.execute(&Command::delete_ca(version), &server.user(1)).unwrap();
    assert!(matches!(server.engine.ca(member), Err(Error::CaNotFound(_))));
    assert!(server.engine.ca_by_name(&CaName::from("CN=member")).is_err());
    assert!(!server.engine.ca(production).unwrap().has_current_certificate_for(key));
    assert!(server.archive.is_scheduled(key));
}

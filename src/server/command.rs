//! Commands that change certificate authorities.

use std::fmt;
use chrono::Duration;
use crate::api::ca::{
    CaId, CaName, SubjectInformationAccess, VersionedId,
};
use crate::api::roa::{AnnouncedRoute, RoaConfigurationPrefix};
use crate::api::ta::TrustAnchorResponse;
use rpki::crypto::KeyIdentifier;


//------------ CommandGroup --------------------------------------------------

/// Who a command originates from.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CommandGroup {
    /// Submitted interactively by a user.
    User,

    /// Scheduled internally and always based on freshly locked state.
    System,
}

impl fmt::Display for CommandGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CommandGroup::User => "USER",
            CommandGroup::System => "SYSTEM",
        })
    }
}


//------------ CommandCategory -----------------------------------------------

/// How a command relates to the CA hierarchy.
///
/// This determines which CAs get locked for the command.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CommandCategory {
    /// Creates a new CA under a parent.
    Activation,

    /// Changes both a child and its parent.
    ChildParent,

    /// Changes a child and may need to change its parent.
    ChildSharedParent,

    /// Changes only the target CA.
    Modification,
}


//------------ CommandType ---------------------------------------------------

/// The type tag of a command.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CommandType {
    CreateAllResourcesCertificateAuthority,
    CreateRootCertificateAuthority,
    CreateIntermediateCertificateAuthority,
    ActivateHostedCertificateAuthority,
    ActivateNonHostedCertificateAuthority,
    DeleteCertificateAuthority,
    UpdateAllIncomingResourceCertificates,
    KeyManagementInitiateRoll,
    KeyManagementActivatePendingKeys,
    KeyManagementRevokeOldKeys,
    ProcessTrustAnchorResponse,
    IssueUpdatedManifestAndCrl,
    ExpireOutgoingResourceCertificates,
    UpdateRoaConfiguration,
    UpdateRoaAlertIgnoredAnnouncedRoutes,
}

impl CommandType {
    /// All command types.
    pub const ALL: [CommandType; 15] = [
        CommandType::CreateAllResourcesCertificateAuthority,
        CommandType::CreateRootCertificateAuthority,
        CommandType::CreateIntermediateCertificateAuthority,
        CommandType::ActivateHostedCertificateAuthority,
        CommandType::ActivateNonHostedCertificateAuthority,
        CommandType::DeleteCertificateAuthority,
        CommandType::UpdateAllIncomingResourceCertificates,
        CommandType::KeyManagementInitiateRoll,
        CommandType::KeyManagementActivatePendingKeys,
        CommandType::KeyManagementRevokeOldKeys,
        CommandType::ProcessTrustAnchorResponse,
        CommandType::IssueUpdatedManifestAndCrl,
        CommandType::ExpireOutgoingResourceCertificates,
        CommandType::UpdateRoaConfiguration,
        CommandType::UpdateRoaAlertIgnoredAnnouncedRoutes,
    ];

    pub fn category(self) -> CommandCategory {
        match self {
            CommandType::CreateAllResourcesCertificateAuthority
            | CommandType::CreateRootCertificateAuthority
            | CommandType::CreateIntermediateCertificateAuthority
            | CommandType::ActivateHostedCertificateAuthority
            | CommandType::ActivateNonHostedCertificateAuthority => {
                CommandCategory::Activation
            }
            CommandType::DeleteCertificateAuthority => {
                CommandCategory::ChildParent
            }
            CommandType::UpdateAllIncomingResourceCertificates
            | CommandType::KeyManagementInitiateRoll
            | CommandType::KeyManagementActivatePendingKeys
            | CommandType::KeyManagementRevokeOldKeys => {
                CommandCategory::ChildSharedParent
            }
            _ => CommandCategory::Modification
        }
    }

    /// Returns whether the command modifies an existing CA.
    pub fn is_modification(self) -> bool {
        self.category() != CommandCategory::Activation
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandType::CreateAllResourcesCertificateAuthority => {
                "CreateAllResourcesCertificateAuthorityCommand"
            }
            CommandType::CreateRootCertificateAuthority => {
                "CreateRootCertificateAuthorityCommand"
            }
            CommandType::CreateIntermediateCertificateAuthority => {
                "CreateIntermediateCertificateAuthorityCommand"
            }
            CommandType::ActivateHostedCertificateAuthority => {
                "ActivateHostedCertificateAuthorityCommand"
            }
            CommandType::ActivateNonHostedCertificateAuthority => {
                "ActivateNonHostedCertificateAuthorityCommand"
            }
            CommandType::DeleteCertificateAuthority => {
                "DeleteCertificateAuthorityCommand"
            }
            CommandType::UpdateAllIncomingResourceCertificates => {
                "UpdateAllIncomingResourceCertificatesCommand"
            }
            CommandType::KeyManagementInitiateRoll => {
                "KeyManagementInitiateRollCommand"
            }
            CommandType::KeyManagementActivatePendingKeys => {
                "KeyManagementActivatePendingKeysCommand"
            }
            CommandType::KeyManagementRevokeOldKeys => {
                "KeyManagementRevokeOldKeysCommand"
            }
            CommandType::ProcessTrustAnchorResponse => {
                "ProcessTrustAnchorResponseCommand"
            }
            CommandType::IssueUpdatedManifestAndCrl => {
                "IssueUpdatedManifestAndCrlCommand"
            }
            CommandType::ExpireOutgoingResourceCertificates => {
                "ExpireOutgoingResourceCertificatesCommand"
            }
            CommandType::UpdateRoaConfiguration => {
                "UpdateRoaConfigurationCommand"
            }
            CommandType::UpdateRoaAlertIgnoredAnnouncedRoutes => {
                "UpdateRoaAlertIgnoredAnnouncedRoutesCommand"
            }
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}


//------------ NonHostedPublicKey --------------------------------------------

/// A key a non-hosted CA wants to have certified.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NonHostedPublicKey {
    pub key: KeyIdentifier,
    pub sia: SubjectInformationAccess,
}


//------------ CommandDetails ------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommandDetails {
    CreateAllResourcesCertificateAuthority {
        name: CaName,
    },
    CreateRootCertificateAuthority {
        name: CaName,
        parent: CaId,
    },
    CreateIntermediateCertificateAuthority {
        name: CaName,
        parent: CaId,
    },
    ActivateHostedCertificateAuthority {
        name: CaName,
        parent: CaId,
    },
    ActivateNonHostedCertificateAuthority {
        name: CaName,
        parent: CaId,
        public_keys: Vec<NonHostedPublicKey>,
    },
    DeleteCertificateAuthority,
    UpdateAllIncomingResourceCertificates {
        /// The maximum number of current certificates per signing key.
        issuance_limit: usize,
    },
    KeyManagementInitiateRoll {
        max_age_days: u32,
    },
    KeyManagementActivatePendingKeys {
        min_staging: Duration,
    },
    KeyManagementRevokeOldKeys,
    ProcessTrustAnchorResponse {
        response: TrustAnchorResponse,
    },
    IssueUpdatedManifestAndCrl,
    ExpireOutgoingResourceCertificates,
    UpdateRoaConfiguration {
        added: Vec<RoaConfigurationPrefix>,
        deleted: Vec<RoaConfigurationPrefix>,
    },
    UpdateRoaAlertIgnoredAnnouncedRoutes {
        added: Vec<AnnouncedRoute>,
        deleted: Vec<AnnouncedRoute>,
    },
}

impl CommandDetails {
    pub fn command_type(&self) -> CommandType {
        match self {
            CommandDetails::CreateAllResourcesCertificateAuthority { .. } => {
                CommandType::CreateAllResourcesCertificateAuthority
            }
            CommandDetails::CreateRootCertificateAuthority { .. } => {
                CommandType::CreateRootCertificateAuthority
            }
            CommandDetails::CreateIntermediateCertificateAuthority { .. } => {
                CommandType::CreateIntermediateCertificateAuthority
            }
            CommandDetails::ActivateHostedCertificateAuthority { .. } => {
                CommandType::ActivateHostedCertificateAuthority
            }
            CommandDetails::ActivateNonHostedCertificateAuthority { .. } => {
                CommandType::ActivateNonHostedCertificateAuthority
            }
            CommandDetails::DeleteCertificateAuthority => {
                CommandType::DeleteCertificateAuthority
            }
            CommandDetails::UpdateAllIncomingResourceCertificates { .. } => {
                CommandType::UpdateAllIncomingResourceCertificates
            }
            CommandDetails::KeyManagementInitiateRoll { .. } => {
                CommandType::KeyManagementInitiateRoll
            }
            CommandDetails::KeyManagementActivatePendingKeys { .. } => {
                CommandType::KeyManagementActivatePendingKeys
            }
            CommandDetails::KeyManagementRevokeOldKeys => {
                CommandType::KeyManagementRevokeOldKeys
            }
            CommandDetails::ProcessTrustAnchorResponse { .. } => {
                CommandType::ProcessTrustAnchorResponse
            }
            CommandDetails::IssueUpdatedManifestAndCrl => {
                CommandType::IssueUpdatedManifestAndCrl
            }
            CommandDetails::ExpireOutgoingResourceCertificates => {
                CommandType::ExpireOutgoingResourceCertificates
            }
            CommandDetails::UpdateRoaConfiguration { .. } => {
                CommandType::UpdateRoaConfiguration
            }
            CommandDetails::UpdateRoaAlertIgnoredAnnouncedRoutes { .. } => {
                CommandType::UpdateRoaAlertIgnoredAnnouncedRoutes
            }
        }
    }

    /// Returns the parent of the CA an activation command creates.
    pub fn activation_parent(&self) -> Option<CaId> {
        match self {
            CommandDetails::CreateRootCertificateAuthority { parent, .. }
            | CommandDetails::CreateIntermediateCertificateAuthority {
                parent, ..
            }
            | CommandDetails::ActivateHostedCertificateAuthority {
                parent, ..
            }
            | CommandDetails::ActivateNonHostedCertificateAuthority {
                parent, ..
            } => Some(*parent),
            _ => None
        }
    }
}


//------------ Command -------------------------------------------------------

/// A command for a certificate authority.
///
/// For activation commands the target is the identifier reserved for the
/// CA to be created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Command {
    ca: VersionedId,
    group: CommandGroup,
    details: CommandDetails,
}

impl Command {
    pub fn new(
        ca: VersionedId, group: CommandGroup, details: CommandDetails
    ) -> Self {
        Command { ca, group, details }
    }

    pub fn create_all_resources_ca(id: CaId, name: CaName) -> Self {
        Self::new(
            VersionedId::initial(id), CommandGroup::User,
            CommandDetails::CreateAllResourcesCertificateAuthority { name }
        )
    }

    pub fn create_root_ca(id: CaId, name: CaName, parent: CaId) -> Self {
        Self::new(
            VersionedId::initial(id), CommandGroup::User,
            CommandDetails::CreateRootCertificateAuthority { name, parent }
        )
    }

    pub fn create_intermediate_ca(
        id: CaId, name: CaName, parent: CaId
    ) -> Self {
        Self::new(
            VersionedId::initial(id), CommandGroup::User,
            CommandDetails::CreateIntermediateCertificateAuthority {
                name, parent
            }
        )
    }

    pub fn activate_hosted_ca(id: CaId, name: CaName, parent: CaId) -> Self {
        Self::new(
            VersionedId::initial(id), CommandGroup::User,
            CommandDetails::ActivateHostedCertificateAuthority { name, parent }
        )
    }

    pub fn activate_non_hosted_ca(
        id: CaId,
        name: CaName,
        parent: CaId,
        public_keys: Vec<NonHostedPublicKey>,
    ) -> Self {
        Self::new(
            VersionedId::initial(id), CommandGroup::User,
            CommandDetails::ActivateNonHostedCertificateAuthority {
                name, parent, public_keys
            }
        )
    }

    pub fn delete_ca(ca: VersionedId) -> Self {
        Self::new(
            ca, CommandGroup::User, CommandDetails::DeleteCertificateAuthority
        )
    }

    pub fn update_all_incoming(ca: VersionedId, issuance_limit: usize) -> Self {
        Self::new(
            ca, CommandGroup::System,
            CommandDetails::UpdateAllIncomingResourceCertificates {
                issuance_limit
            }
        )
    }

    pub fn initiate_roll(ca: VersionedId, max_age_days: u32) -> Self {
        Self::new(
            ca, CommandGroup::System,
            CommandDetails::KeyManagementInitiateRoll { max_age_days }
        )
    }

    /// Activates keys that have been staged for long enough.
    pub fn activate_pending_keys_planned(
        ca: VersionedId, min_staging: Duration
    ) -> Self {
        Self::new(
            ca, CommandGroup::System,
            CommandDetails::KeyManagementActivatePendingKeys { min_staging }
        )
    }

    /// Activates pending keys right now on behalf of an operator.
    pub fn activate_pending_keys_manual(ca: VersionedId) -> Self {
        Self::new(
            ca, CommandGroup::User,
            CommandDetails::KeyManagementActivatePendingKeys {
                min_staging: Duration::zero()
            }
        )
    }

    pub fn revoke_old_keys(ca: VersionedId) -> Self {
        Self::new(
            ca, CommandGroup::System, CommandDetails::KeyManagementRevokeOldKeys
        )
    }

    pub fn process_ta_response(
        ca: VersionedId, response: TrustAnchorResponse
    ) -> Self {
        Self::new(
            ca, CommandGroup::User,
            CommandDetails::ProcessTrustAnchorResponse { response }
        )
    }

    pub fn issue_updated_manifest_and_crl(ca: VersionedId) -> Self {
        Self::new(
            ca, CommandGroup::System, CommandDetails::IssueUpdatedManifestAndCrl
        )
    }

    pub fn expire_outgoing_certificates(ca: VersionedId) -> Self {
        Self::new(
            ca, CommandGroup::System,
            CommandDetails::ExpireOutgoingResourceCertificates
        )
    }

    pub fn update_roa_configuration(
        ca: VersionedId,
        added: Vec<RoaConfigurationPrefix>,
        deleted: Vec<RoaConfigurationPrefix>,
    ) -> Self {
        Self::new(
            ca, CommandGroup::User,
            CommandDetails::UpdateRoaConfiguration { added, deleted }
        )
    }

    pub fn update_ignored_announcements(
        ca: VersionedId,
        added: Vec<AnnouncedRoute>,
        deleted: Vec<AnnouncedRoute>,
    ) -> Self {
        Self::new(
            ca, CommandGroup::User,
            CommandDetails::UpdateRoaAlertIgnoredAnnouncedRoutes {
                added, deleted
            }
        )
    }

    pub fn ca(&self) -> VersionedId {
        self.ca
    }

    pub fn ca_id(&self) -> CaId {
        self.ca.id()
    }

    pub fn group(&self) -> CommandGroup {
        self.group
    }

    pub fn is_system(&self) -> bool {
        self.group == CommandGroup::System
    }

    pub fn details(&self) -> &CommandDetails {
        &self.details
    }

    pub fn command_type(&self) -> CommandType {
        self.details.command_type()
    }

    /// Returns a human readable summary of the command.
    pub fn summary(&self) -> String {
        match &self.details {
            CommandDetails::CreateAllResourcesCertificateAuthority { name } => {
                format!("Created all resources certificate authority '{name}'.")
            }
            CommandDetails::CreateRootCertificateAuthority { name, .. } => {
                format!("Created production certificate authority '{name}'.")
            }
            CommandDetails::CreateIntermediateCertificateAuthority {
                name, ..
            } => {
                format!("Created intermediate certificate authority '{name}'.")
            }
            CommandDetails::ActivateHostedCertificateAuthority { name, .. } => {
                format!("Activated hosted certificate authority '{name}'.")
            }
            CommandDetails::ActivateNonHostedCertificateAuthority {
                name, public_keys, ..
            } => {
                format!(
                    "Activated non-hosted certificate authority '{}' \
                     with {} public key(s).",
                    name, public_keys.len()
                )
            }
            CommandDetails::DeleteCertificateAuthority => {
                "Deleted certificate authority.".into()
            }
            CommandDetails::UpdateAllIncomingResourceCertificates {
                issuance_limit
            } => {
                if *issuance_limit == usize::MAX {
                    "Updated all incoming certificates.".into()
                }
                else {
                    format!(
                        "Updated all incoming certificates \
                         (limit {issuance_limit})."
                    )
                }
            }
            CommandDetails::KeyManagementInitiateRoll { max_age_days } => {
                format!(
                    "Initiated key roll over for keys older than \
                     {max_age_days} days."
                )
            }
            CommandDetails::KeyManagementActivatePendingKeys {
                min_staging
            } => {
                format!(
                    "Activated pending keys staged for at least {} hours.",
                    min_staging.num_hours()
                )
            }
            CommandDetails::KeyManagementRevokeOldKeys => {
                "Revoked old keys.".into()
            }
            CommandDetails::ProcessTrustAnchorResponse { response } => {
                format!(
                    "Processed trust anchor response {}.", response.request_id
                )
            }
            CommandDetails::IssueUpdatedManifestAndCrl => {
                "Issued updated manifest and CRL.".into()
            }
            CommandDetails::ExpireOutgoingResourceCertificates => {
                "Expired outgoing resource certificates.".into()
            }
            CommandDetails::UpdateRoaConfiguration { added, deleted } => {
                format!(
                    "Updated ROA configuration. Additions: {}. Deletions: {}.",
                    join_or_none(added), join_or_none(deleted)
                )
            }
            CommandDetails::UpdateRoaAlertIgnoredAnnouncedRoutes {
                added, deleted
            } => {
                format!(
                    "Updated suppressed routes for ROA alerts. \
                     Additions: {}. Deletions: {}.",
                    join_or_none(added), join_or_none(deleted)
                )
            }
        }
    }
}

fn join_or_none<T: fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "none".into()
    }
    items.iter().map(|item| format!("[{item}]")).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} for CA {}", self.command_type(), self.ca)
    }
}


//------------ CommandStatus -------------------------------------------------

/// The outcome of executing a command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommandStatus {
    has_effect: bool,
}

impl Default for CommandStatus {
    fn default() -> Self {
        CommandStatus { has_effect: true }
    }
}

impl CommandStatus {
    pub fn has_effect(&self) -> bool {
        self.has_effect
    }

    pub fn set_has_effect(&mut self, has_effect: bool) {
        self.has_effect = has_effect
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn command_categories() {
        assert_eq!(
            CommandType::ActivateHostedCertificateAuthority.category(),
            CommandCategory::Activation
        );
        assert!(!CommandType::CreateRootCertificateAuthority.is_modification());
        assert_eq!(
            CommandType::DeleteCertificateAuthority.category(),
            CommandCategory::ChildParent
        );
        assert_eq!(
            CommandType::KeyManagementRevokeOldKeys.category(),
            CommandCategory::ChildSharedParent
        );
        assert_eq!(
            CommandType::UpdateRoaConfiguration.category(),
            CommandCategory::Modification
        );
        for ty in CommandType::ALL {
            assert!(ty.name().ends_with("Command"));
        }
    }

    #[test]
    fn manual_activation_is_user_command() {
        let ca = VersionedId::new(CaId::new(1), 3);
        let planned = Command::activate_pending_keys_planned(
            ca, Duration::hours(24)
        );
        let manual = Command::activate_pending_keys_manual(ca);
        assert!(planned.is_system());
        assert!(!manual.is_system());
        assert_eq!(manual.command_type(), planned.command_type());
    }

    #[test]
    fn roa_summary() {
        let cmd = Command::update_roa_configuration(
            VersionedId::new(CaId::new(1), 0),
            vec![test::roa("10.0.0.0/8-16 => 64496")],
            vec![],
        );
        assert_eq!(
            cmd.summary(),
            "Updated ROA configuration. Additions: [10.0.0.0/8-16 => 64496]. \
             Deletions: none."
        );
    }
}

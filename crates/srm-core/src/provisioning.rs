// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Provisioning status (PSTAT): device onboarding states, the operation-mode
// mask derived from them, and the transition rules between them.
//
// Legal chain: Reset -> RFOTM -> RFPRO -> RFNOP, plus `* -> Reset`.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SrmError};

/// Device onboarding state (`dos.s` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceState {
    Reset,
    ReadyForOwnershipTransfer,
    ReadyForProvisioning,
    ReadyForNormalOperation,
}

impl DeviceState {
    pub const ALL: [DeviceState; 4] = [
        Self::Reset,
        Self::ReadyForOwnershipTransfer,
        Self::ReadyForProvisioning,
        Self::ReadyForNormalOperation,
    ];

    pub fn code(&self) -> u8 {
        match self {
            Self::Reset => 0,
            Self::ReadyForOwnershipTransfer => 1,
            Self::ReadyForProvisioning => 2,
            Self::ReadyForNormalOperation => 3,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| u64::from(s.code()) == code)
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Reset => "RESET",
            Self::ReadyForOwnershipTransfer => "RFOTM",
            Self::ReadyForProvisioning => "RFPRO",
            Self::ReadyForNormalOperation => "RFNOP",
        }
    }

    /// The next state along the onboarding chain.
    pub fn successor(&self) -> Option<Self> {
        match self {
            Self::Reset => Some(Self::ReadyForOwnershipTransfer),
            Self::ReadyForOwnershipTransfer => Some(Self::ReadyForProvisioning),
            Self::ReadyForProvisioning => Some(Self::ReadyForNormalOperation),
            Self::ReadyForNormalOperation => None,
        }
    }

    /// A target is reachable only if it is the immediate successor or Reset.
    pub fn can_transition_to(&self, target: DeviceState) -> bool {
        target == Self::Reset || self.successor() == Some(target)
    }

    /// Operation modes a device in this state may hold.
    pub fn legal_modes(&self, allow_default_acl_override_in_rfnop: bool) -> OperationMode {
        match self {
            Self::Reset => OperationMode::empty(),
            Self::ReadyForOwnershipTransfer => OperationMode::ACL_APPEND,
            Self::ReadyForProvisioning => OperationMode::all(),
            Self::ReadyForNormalOperation => {
                let mut modes = OperationMode::all() - OperationMode::ACL_REPLACE;
                if !allow_default_acl_override_in_rfnop {
                    modes -= OperationMode::DEFAULT_ACL_OVERRIDE;
                }
                modes
            }
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for DeviceState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RESET" | "0" => Ok(Self::Reset),
            "RFOTM" | "1" => Ok(Self::ReadyForOwnershipTransfer),
            "RFPRO" | "2" => Ok(Self::ReadyForProvisioning),
            "RFNOP" | "3" => Ok(Self::ReadyForNormalOperation),
            other => Err(format!("unknown device state `{other}`")),
        }
    }
}

bitflags! {
    /// Which security-resource mutations are currently permitted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct OperationMode: u16 {
        const ACL_APPEND = 1 << 0;
        const ACL_REPLACE = 1 << 1;
        const ACL_DELETE = 1 << 2;
        const SVC_WRITE = 1 << 3;
        const SVC_DELETE = 1 << 4;
        const DEFAULT_ACL_OVERRIDE = 1 << 5;
    }
}

/// A mutation that must be cleared against the operation mode first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    AclAppend,
    AclReplace,
    AclDelete,
    SvcWrite,
    SvcDelete,
    DefaultAclOverride,
}

impl Operation {
    pub fn required_mode(&self) -> OperationMode {
        match self {
            Self::AclAppend => OperationMode::ACL_APPEND,
            Self::AclReplace => OperationMode::ACL_REPLACE,
            Self::AclDelete => OperationMode::ACL_DELETE,
            Self::SvcWrite => OperationMode::SVC_WRITE,
            Self::SvcDelete => OperationMode::SVC_DELETE,
            Self::DefaultAclOverride => OperationMode::DEFAULT_ACL_OVERRIDE,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AclAppend => "ACL append",
            Self::AclReplace => "ACL replace",
            Self::AclDelete => "ACL delete",
            Self::SvcWrite => "SVC write",
            Self::SvcDelete => "SVC delete",
            Self::DefaultAclOverride => "default ACL override",
        };
        f.write_str(name)
    }
}

/// The device's single provisioning status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pstat {
    pub state: DeviceState,
    /// Set only while a transition is pending (or failed and awaits retry).
    pub target: Option<DeviceState>,
    pub operation_mode: OperationMode,
    pub rowner: Uuid,
    /// Whether the last transition fully completed.
    pub committed: bool,
}

impl Default for Pstat {
    fn default() -> Self {
        Self {
            state: DeviceState::Reset,
            target: None,
            operation_mode: OperationMode::empty(),
            rowner: Uuid::nil(),
            committed: true,
        }
    }
}

impl Pstat {
    pub fn is_operation_permitted(&self, operation: Operation) -> bool {
        self.operation_mode.contains(operation.required_mode())
    }

    /// Fail with `NotPermittedInCurrentState` unless `operation` is allowed.
    pub fn require(&self, operation: Operation) -> Result<()> {
        if self.is_operation_permitted(operation) {
            Ok(())
        } else {
            Err(SrmError::NotPermittedInCurrentState {
                operation,
                state: self.state,
            })
        }
    }

    /// True once the device is in normal operation.
    pub fn is_operational(&self) -> bool {
        self.state == DeviceState::ReadyForNormalOperation
    }

    pub fn check_transition(&self, target: DeviceState) -> Result<()> {
        if self.state.can_transition_to(target) {
            Ok(())
        } else {
            Err(SrmError::IllegalTransition {
                from: self.state,
                to: target,
            })
        }
    }

    /// Complete a transition into `target` with its legal operation modes.
    pub fn enter(&mut self, target: DeviceState, modes: OperationMode) {
        self.state = target;
        self.target = None;
        self.operation_mode = modes;
        self.committed = true;
    }

    /// Record a transition toward `target` that did not complete.
    pub fn mark_pending(&mut self, target: DeviceState) {
        self.target = Some(target);
        self.committed = false;
    }
}

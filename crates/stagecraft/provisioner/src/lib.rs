//! Stagecraft Provisioner - Idempotent provisioning of remote resources
//!
//! Creates or retrieves workspaces, the items nested in them, and role
//! assignments on workspaces. The [`ResourceRegistry`](stagecraft_registry::ResourceRegistry)
//! is consulted first, so repeated requests for the same key converge on one
//! remote resource. Naming and capacity-tier checks run before any remote
//! call.
//!
//! Mutations are registered with an [`OperationLog`](stagecraft_types::OperationLog)
//! before they are sent. The provisioner also executes the resulting
//! compensations as a [`CompensationExecutor`](stagecraft_types::CompensationExecutor).
//! It depends only on the registry and the gateway; whoever drives it
//! supplies the log.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod api;
pub mod error;
pub mod provisioner;
pub mod validation;

pub use error::{ProvisionError, Result, CAPACITY_ERROR_CODES};
pub use provisioner::{role_key, PlannedAction, Provisioned, Provisioner};
pub use validation::{validate_name, validate_spec, MAX_NAME_LEN};

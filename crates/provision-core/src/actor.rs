//! `ProvisionActor`: serialises provisioning operations
//!
//! Owns the `Provisioner`; the mailbox guarantees a process never runs two
//! phases at once.

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::{ActorStopReason, SendError};
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tracing::info;

use crate::error::ProvisionError;
use crate::message::{
    Activate, Allocate, Bootstrap, Checkout, EnvironmentTable, EventStream, Full, GetStatus,
    ListEnvironments, Reset, Resolve, StatusReport, Subscribe, SyncComponents,
};
use crate::orchestrator::{PhaseReport, Provisioner, ProvisionerArgs};
use crate::resolver::ResolvedHost;

/// Actor front-end of the provisioning state machine
pub struct ProvisionActor {
    provisioner: Provisioner,
}

impl Actor for ProvisionActor {
    type Args = ProvisionerArgs;
    type Error = ProvisionError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(
            id = %actor_ref.id(),
            environments = args.registry.len(),
            "ProvisionActor starting"
        );

        Ok(Self {
            provisioner: Provisioner::new(args),
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(reason = ?reason, "ProvisionActor stopping");
        self.provisioner.disconnect().await;
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<Allocate> for ProvisionActor {
    type Reply = Result<PhaseReport, ProvisionError>;

    async fn handle(
        &mut self,
        msg: Allocate,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.provisioner.allocate(&msg.spec, msg.dry_run).await
    }
}

impl Message<Bootstrap> for ProvisionActor {
    type Reply = Result<PhaseReport, ProvisionError>;

    async fn handle(
        &mut self,
        msg: Bootstrap,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.provisioner.bootstrap(&msg.host).await
    }
}

impl Message<Checkout> for ProvisionActor {
    type Reply = Result<PhaseReport, ProvisionError>;

    async fn handle(
        &mut self,
        msg: Checkout,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.provisioner
            .checkout(&msg.host, msg.env.as_deref())
            .await
    }
}

impl Message<SyncComponents> for ProvisionActor {
    type Reply = Result<PhaseReport, ProvisionError>;

    async fn handle(
        &mut self,
        msg: SyncComponents,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.provisioner
            .sync(&msg.host, &msg.env, &msg.components)
            .await
    }
}

impl Message<Activate> for ProvisionActor {
    type Reply = Result<PhaseReport, ProvisionError>;

    async fn handle(
        &mut self,
        msg: Activate,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.provisioner.activate(&msg.host, &msg.env).await
    }
}

impl Message<Full> for ProvisionActor {
    type Reply = Result<Vec<PhaseReport>, ProvisionError>;

    async fn handle(
        &mut self,
        msg: Full,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.provisioner.full(&msg.spec, msg.env.as_deref()).await
    }
}

impl Message<GetStatus> for ProvisionActor {
    type Reply = StatusReport;

    async fn handle(
        &mut self,
        msg: GetStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        StatusReport {
            records: self.provisioner.status(msg.host.as_deref()),
        }
    }
}

impl Message<Reset> for ProvisionActor {
    type Reply = Result<usize, ProvisionError>;

    async fn handle(
        &mut self,
        msg: Reset,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.provisioner.reset(&msg.host, msg.env.as_deref())
    }
}

impl Message<Resolve> for ProvisionActor {
    type Reply = Result<ResolvedHost, ProvisionError>;

    async fn handle(
        &mut self,
        msg: Resolve,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.provisioner.resolve(&msg.identifier).await
    }
}

impl Message<ListEnvironments> for ProvisionActor {
    type Reply = EnvironmentTable;

    async fn handle(
        &mut self,
        _msg: ListEnvironments,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        EnvironmentTable {
            base_port: self.provisioner.config().base_port,
            environments: self.provisioner.registry().iter().cloned().collect(),
        }
    }
}

impl Message<Subscribe> for ProvisionActor {
    type Reply = EventStream;

    async fn handle(
        &mut self,
        _msg: Subscribe,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        EventStream(self.provisioner.subscribe())
    }
}

/// Unwrap an `ask` reply, keeping the handler's own error intact
///
/// # Errors
/// Returns the handler's `ProvisionError`, or `ProvisionError::Actor` if the
/// message never reached the actor
pub fn reply<M, T>(result: Result<T, SendError<M, ProvisionError>>) -> Result<T, ProvisionError>
where
    SendError<M, ProvisionError>: std::fmt::Display,
{
    match result {
        Ok(value) => Ok(value),
        Err(SendError::HandlerError(err)) => Err(err),
        Err(err) => Err(ProvisionError::Actor(err.to_string())),
    }
}

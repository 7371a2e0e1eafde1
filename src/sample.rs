//! Sample saga used by the `tracing-sample` binary
//!
//! `CreateUserSaga` is started by `CreateUser`, correlated on the user
//! name. It stores the name, marks itself complete and sends
//! `UserCreated` to the local endpoint, all in one invocation.

use crate::context::{HandlerContext, IncomingMessage, Saga};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command asking for a user to be created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub user_name: String,
}

/// Event announcing a created user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreated {
    pub user_name: String,
}

/// Persistent state of `CreateUserSaga`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSagaData {
    pub id: Uuid,

    /// Correlation property
    pub user_name: String,
}

/// Saga that handles user creation
#[derive(Debug, Clone)]
pub struct CreateUserSaga {
    data: UserSagaData,
    completed: bool,
}

impl CreateUserSaga {
    /// Start a new saga instance for an inbound `CreateUser`
    pub fn start(message: &CreateUser) -> Self {
        Self {
            data: UserSagaData {
                id: Uuid::new_v4(),
                user_name: message.user_name.clone(),
            },
            completed: false,
        }
    }

    /// Resume a saga from previously persisted data
    pub fn from_data(data: UserSagaData) -> Self {
        Self {
            data,
            completed: false,
        }
    }

    /// Whether `message` belongs to this saga instance
    pub fn correlates(&self, message: &CreateUser) -> bool {
        self.data.user_name == message.user_name
    }

    /// Saga data
    pub fn data(&self) -> &UserSagaData {
        &self.data
    }

    fn mark_as_complete(&mut self) {
        self.completed = true;
    }
}

#[async_trait]
impl Saga for CreateUserSaga {
    fn saga_id(&self) -> Uuid {
        self.data.id
    }

    fn completed(&self) -> bool {
        self.completed
    }

    fn entity(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.data)?)
    }

    async fn handle(&mut self, message: &IncomingMessage, ctx: &mut HandlerContext) -> Result<()> {
        let message: CreateUser = message.body_as()?;
        self.data.user_name = message.user_name.clone();
        tracing::info!(user_name = %message.user_name, "User created.");

        let user_created = UserCreated {
            user_name: message.user_name,
        };
        self.mark_as_complete();
        ctx.send_local(&user_created)?;
        Ok(())
    }
}

use super::{ServiceContext, Settlement, non_empty};
use crate::{
    Result,
    cache::keys,
    model::User,
    notify::{ChangeEvent, Operation},
    store::{IsolationLevel, Repository},
};
use chrono::Utc;

#[derive(Clone)]
pub struct UserService {
    ctx: ServiceContext,
    users: Repository<User>,
}

impl UserService {
    pub fn new(ctx: ServiceContext) -> Self {
        let users = Repository::new(ctx.transactions.clone());
        Self { ctx, users }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn create_user(&self, username: &str) -> Result<User> {
        let username = non_empty("username", username)?;
        self.ctx
            .execute(
                Operation::Create,
                0,
                IsolationLevel::ReadCommitted,
                format!("create user {username}"),
                move |tx| {
                    Box::pin(async move {
                        tx.insert(User {
                            user_id: 0,
                            username,
                            created_at: Utc::now(),
                        })
                        .await
                    })
                },
                |user: &User| {
                    Settlement::new(
                        user_keys(user.user_id),
                        ChangeEvent::new(
                            Operation::Create,
                            user.user_id,
                            format!("User {} created", user.user_id),
                        ),
                    )
                },
            )
            .await
    }

    pub async fn get_user(&self, user_id: i64) -> Result<User> {
        self.ctx
            .cache
            .read_through(&keys::user(user_id), || self.users.get(user_id))
            .await
    }

    pub async fn get_users(&self) -> Result<Vec<User>> {
        self.ctx
            .cache
            .read_through(keys::ALL_USERS, || self.users.list())
            .await
    }

    /// Renames `user_id`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn update_user(&self, user_id: i64, username: &str) -> Result<User> {
        let username = non_empty("username", username)?;
        self.ctx
            .execute(
                Operation::Update,
                user_id,
                IsolationLevel::ReadCommitted,
                format!("update user {user_id}"),
                move |tx| {
                    Box::pin(async move {
                        let mut user = tx.require::<User>(user_id).await?;
                        user.username = username;
                        tx.update(&user).await
                    })
                },
                move |_: &User| {
                    Settlement::new(
                        user_keys(user_id),
                        ChangeEvent::new(
                            Operation::Update,
                            user_id,
                            format!("User {user_id} updated"),
                        ),
                    )
                },
            )
            .await
    }

    /// Deletes a user without orders or returns.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_user(&self, user_id: i64) -> Result<()> {
        self.ctx
            .execute(
                Operation::Delete,
                user_id,
                IsolationLevel::Serializable,
                format!("delete user {user_id}"),
                move |tx| Box::pin(async move { tx.delete::<User>(user_id).await }),
                move |_: &User| {
                    Settlement::new(
                        user_keys(user_id),
                        ChangeEvent::new(
                            Operation::Delete,
                            user_id,
                            format!("User {user_id} deleted"),
                        ),
                    )
                },
            )
            .await
            .map(|_| ())
    }

    pub async fn user_exists(&self, user_id: i64) -> Result<bool> {
        self.users.exists(user_id).await
    }

    pub async fn get_username(&self, user_id: i64) -> Result<String> {
        Ok(self.get_user(user_id).await?.username)
    }
}

fn user_keys(user_id: i64) -> Vec<String> {
    vec![keys::user(user_id), keys::ALL_USERS.to_string()]
}

//! User registry service

use crate::{
    error::{AppError, AppResult},
    models::user::{CreateUser, User},
    repository::Sequence,
};

use super::LedgerContext;

#[derive(Clone)]
pub struct UsersService {
    ctx: LedgerContext,
}

impl UsersService {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Register a new user
    pub async fn register(&self, data: CreateUser) -> AppResult<User> {
        let name = data.name.trim();
        let email = data.email.trim().to_lowercase();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }
        if !email.contains('@') {
            return Err(AppError::Validation(format!("invalid email: {}", data.email)));
        }

        let user = User {
            id: self.ctx.repository.next_id(Sequence::User).await?,
            name: name.to_string(),
            email,
            role: data.role,
            created_at: self.ctx.clock.now(),
        };
        self.ctx.repository.insert_user(&user).await?;

        tracing::info!(user_id = user.id, role = %user.role, "User registered");
        Ok(user)
    }

    /// Get user by ID
    pub async fn get(&self, id: i32) -> AppResult<User> {
        self.ctx
            .repository
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))
    }
}

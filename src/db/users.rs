use chrono::Utc;

use crate::db::models::{Customer, Manager, Organization, User, UserRole, new_id, ts};
use crate::db::sqlite::Storage;
use crate::error::CallControlError;

impl Storage {
    pub async fn create_organization(&self, name: &str) -> Result<Organization, CallControlError> {
        let org = Organization {
            id: new_id(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO organizations (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&org.id)
            .bind(&org.name)
            .bind(ts(org.created_at))
            .execute(self.pool())
            .await?;
        Ok(org)
    }

    pub async fn get_organization(&self, id: &str) -> Result<Option<Organization>, CallControlError> {
        let org = sqlx::query_as::<_, Organization>(
            "SELECT id, name, created_at FROM organizations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(org)
    }

    pub async fn insert_user(&self, user: &User) -> Result<(), CallControlError> {
        sqlx::query(
            r#"INSERT INTO users (id, organization_id, email, full_name, role, is_active, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&user.id)
        .bind(&user.organization_id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(user.role)
        .bind(user.is_active)
        .bind(ts(user.created_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, CallControlError> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, organization_id, email, full_name, role, is_active, created_at
               FROM users WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(user)
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, CallControlError> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, organization_id, email, full_name, role, is_active, created_at
               FROM users WHERE email = ? COLLATE NOCASE"#,
        )
        .bind(email)
        .fetch_optional(self.pool())
        .await?;
        Ok(user)
    }

    pub async fn list_users(&self, organization_id: &str) -> Result<Vec<User>, CallControlError> {
        let users = sqlx::query_as::<_, User>(
            r#"SELECT id, organization_id, email, full_name, role, is_active, created_at
               FROM users WHERE organization_id = ? ORDER BY created_at"#,
        )
        .bind(organization_id)
        .fetch_all(self.pool())
        .await?;
        Ok(users)
    }

    /// Active user ids of an organization, used for org-wide notifications.
    pub async fn active_user_ids(&self, organization_id: &str) -> Result<Vec<String>, CallControlError> {
        let ids: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM users WHERE organization_id = ? AND is_active = 1")
                .bind(organization_id)
                .fetch_all(self.pool())
                .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    pub async fn set_user_role(&self, id: &str, role: UserRole) -> Result<(), CallControlError> {
        let res = sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role)
            .bind(id)
            .execute(self.pool())
            .await?;
        if res.rows_affected() == 0 {
            return Err(CallControlError::NotFound("user"));
        }
        Ok(())
    }

    pub async fn set_user_active(&self, id: &str, active: bool) -> Result<(), CallControlError> {
        let res = sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(self.pool())
            .await?;
        if res.rows_affected() == 0 {
            return Err(CallControlError::NotFound("user"));
        }
        Ok(())
    }

    pub async fn insert_manager(
        &self,
        organization_id: &str,
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Manager, CallControlError> {
        let manager = Manager {
            id: new_id(),
            organization_id: organization_id.to_string(),
            name: name.to_string(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            created_at: Utc::now(),
        };
        sqlx::query(
            r#"INSERT INTO managers (id, organization_id, name, email, phone, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&manager.id)
        .bind(&manager.organization_id)
        .bind(&manager.name)
        .bind(&manager.email)
        .bind(&manager.phone)
        .bind(ts(manager.created_at))
        .execute(self.pool())
        .await?;
        Ok(manager)
    }

    pub async fn get_manager(&self, id: &str) -> Result<Option<Manager>, CallControlError> {
        let manager = sqlx::query_as::<_, Manager>(
            "SELECT id, organization_id, name, email, phone, created_at FROM managers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(manager)
    }

    pub async fn list_managers(&self, organization_id: &str) -> Result<Vec<Manager>, CallControlError> {
        let managers = sqlx::query_as::<_, Manager>(
            r#"SELECT id, organization_id, name, email, phone, created_at
               FROM managers WHERE organization_id = ? ORDER BY name"#,
        )
        .bind(organization_id)
        .fetch_all(self.pool())
        .await?;
        Ok(managers)
    }

    /// Customers are keyed by phone inside an organization.
    pub async fn find_or_create_customer(
        &self,
        organization_id: &str,
        phone: &str,
        name: Option<&str>,
    ) -> Result<Customer, CallControlError> {
        let existing = sqlx::query_as::<_, Customer>(
            r#"SELECT id, organization_id, name, phone, email, created_at
               FROM customers WHERE organization_id = ? AND phone = ?"#,
        )
        .bind(organization_id)
        .bind(phone)
        .fetch_optional(self.pool())
        .await?;
        if let Some(customer) = existing {
            return Ok(customer);
        }

        let customer = Customer {
            id: new_id(),
            organization_id: organization_id.to_string(),
            name: name.map(str::to_string),
            phone: Some(phone.to_string()),
            email: None,
            created_at: Utc::now(),
        };
        sqlx::query(
            r#"INSERT INTO customers (id, organization_id, name, phone, email, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&customer.id)
        .bind(&customer.organization_id)
        .bind(&customer.name)
        .bind(&customer.phone)
        .bind(&customer.email)
        .bind(ts(customer.created_at))
        .execute(self.pool())
        .await?;
        Ok(customer)
    }
}

//! Emergency contact repository

use sqlx::SqlitePool;
use uuid::Uuid;

use nightwatch_core::models::EmergencyContact;

use crate::db::audit::{AuditContext, NewAuditEvent};
use crate::error::ApiError;

/// Fields accepted when creating or replacing a contact
#[derive(Debug, Clone)]
pub struct ContactInput {
    pub name: String,
    pub number: String,
    pub description: String,
    pub is_default: bool,
    pub display_order: i64,
}

/// List contacts in display order
pub async fn list_contacts(pool: &SqlitePool) -> Result<Vec<EmergencyContact>, ApiError> {
    let contacts = sqlx::query_as::<_, EmergencyContact>(
        "SELECT * FROM emergency_contacts ORDER BY display_order, name",
    )
    .fetch_all(pool)
    .await?;

    Ok(contacts)
}

/// Create a contact; a new default demotes any existing one
pub async fn create_contact(
    pool: &SqlitePool,
    input: ContactInput,
    ctx: &AuditContext,
) -> Result<EmergencyContact, ApiError> {
    let mut tx = pool.begin().await?;

    if input.is_default {
        sqlx::query("UPDATE emergency_contacts SET is_default = 0")
            .execute(&mut *tx)
            .await?;
    }

    let contact = sqlx::query_as::<_, EmergencyContact>(
        r#"
        INSERT INTO emergency_contacts (id, name, number, description, is_default, display_order)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&input.name)
    .bind(&input.number)
    .bind(&input.description)
    .bind(input.is_default)
    .bind(input.display_order)
    .fetch_one(&mut *tx)
    .await?;

    super::audit::record(
        &mut *tx,
        ctx,
        NewAuditEvent::new("contact.created", "emergency_contact", "create")
            .entity_id(contact.id),
    )
    .await?;
    tx.commit().await?;

    Ok(contact)
}

/// Replace a contact's fields
pub async fn update_contact(
    pool: &SqlitePool,
    id: Uuid,
    input: ContactInput,
    ctx: &AuditContext,
) -> Result<EmergencyContact, ApiError> {
    let mut tx = pool.begin().await?;

    if input.is_default {
        sqlx::query("UPDATE emergency_contacts SET is_default = 0 WHERE id != ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    let contact = sqlx::query_as::<_, EmergencyContact>(
        r#"
        UPDATE emergency_contacts
        SET name = ?, number = ?, description = ?, is_default = ?, display_order = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(&input.name)
    .bind(&input.number)
    .bind(&input.description)
    .bind(input.is_default)
    .bind(input.display_order)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("Contact not found: {id}")))?;

    super::audit::record(
        &mut *tx,
        ctx,
        NewAuditEvent::new("contact.updated", "emergency_contact", "update").entity_id(id),
    )
    .await?;
    tx.commit().await?;

    Ok(contact)
}

/// Delete a contact
pub async fn delete_contact(
    pool: &SqlitePool,
    id: Uuid,
    ctx: &AuditContext,
) -> Result<(), ApiError> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query("DELETE FROM emergency_contacts WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("Contact not found: {id}")));
    }

    super::audit::record(
        &mut *tx,
        ctx,
        NewAuditEvent::new("contact.deleted", "emergency_contact", "delete").entity_id(id),
    )
    .await?;
    tx.commit().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, is_default: bool, order: i64) -> ContactInput {
        ContactInput {
            name: name.to_string(),
            number: "10111".to_string(),
            description: "Flying squad".to_string(),
            is_default,
            display_order: order,
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_single_default_is_enforced(pool: SqlitePool) {
        let first = create_contact(&pool, input("SAPS", true, 0), &AuditContext::system())
            .await
            .unwrap();
        assert!(first.is_default);

        let second = create_contact(&pool, input("Sector patrol", true, 1), &AuditContext::system())
            .await
            .unwrap();
        assert!(second.is_default);

        let contacts = list_contacts(&pool).await.unwrap();
        let defaults: Vec<_> = contacts.iter().filter(|c| c.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, second.id);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_list_respects_display_order(pool: SqlitePool) {
        create_contact(&pool, input("Z last", false, 5), &AuditContext::system())
            .await
            .unwrap();
        create_contact(&pool, input("A first", false, 1), &AuditContext::system())
            .await
            .unwrap();

        let contacts = list_contacts(&pool).await.unwrap();
        assert_eq!(contacts[0].name, "A first");
        assert_eq!(contacts[1].name, "Z last");
    }
}

use chrono::Duration as ChronoDuration;
use std::env;
use uuid::Uuid;

use ysk_clinic_api::db::Database;
use ysk_clinic_api::db_storage::{ClinicStorage, NewReservation};
use ysk_clinic_api::models::{clinic_today, FaqInput, ReminderKind};
use ysk_clinic_api::reminder_scheduler::ReservationStore;

/// Integration smoke tests against a real Postgres loaded with `schema.sql`.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
async fn storage() -> anyhow::Result<ClinicStorage> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    Ok(ClinicStorage::new(db.pool))
}

/// Unique mobile number so repeated runs do not collide on the phone constraint.
fn unique_phone() -> String {
    format!("0109{:07}", Uuid::new_v4().as_u128() % 10_000_000)
}

#[tokio::test]
#[ignore]
async fn reminder_flags_round_trip() -> anyhow::Result<()> {
    let storage = storage().await?;
    let phone = unique_phone();

    let patient_id = storage
        .upsert_patient("통합 테스트", &phone, Some("it@example.com"))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let again = storage
        .upsert_patient("통합 테스트2", &phone, None)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(patient_id, again);

    // Far enough ahead that no real reservation shares the date
    let date = clinic_today() + ChronoDuration::days(3650);
    let reservation_id = storage
        .create_reservation(&NewReservation {
            patient_id,
            date,
            time: "10:00",
            service_code: "cataract",
            notes: "출처: integration".into(),
        })
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let due = storage
        .due_reservations(date, ReminderKind::DayBefore)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let row = due
        .iter()
        .find(|r| r.id == reservation_id)
        .ok_or_else(|| anyhow::anyhow!("new reservation is not due"))?;
    assert_eq!(row.reservation_time, "10:00");
    let patient = row.patient.as_ref().ok_or_else(|| anyhow::anyhow!("patient not joined"))?;
    assert_eq!(patient.email.as_deref(), Some("it@example.com"));

    storage
        .mark_reminder_sent(reservation_id, ReminderKind::DayBefore)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let due = storage
        .due_reservations(date, ReminderKind::DayBefore)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(due.iter().all(|r| r.id != reservation_id));

    let still_due_today = storage
        .due_reservations(date, ReminderKind::SameDay)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(still_due_today.iter().any(|r| r.id == reservation_id));

    Ok(())
}

#[tokio::test]
#[ignore]
async fn faq_lifecycle() -> anyhow::Result<()> {
    let storage = storage().await?;

    let faq = storage
        .create_faq(&FaqInput {
            category: "general".into(),
            question: "진료 시간은 어떻게 되나요?".into(),
            answer: "평일 오전 9시부터 오후 6시까지 진료합니다.".into(),
            order_index: 1,
            is_published: true,
        })
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(faq.is_published);

    let toggled = storage
        .toggle_faq_published(faq.id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .ok_or_else(|| anyhow::anyhow!("faq vanished"))?;
    assert!(!toggled.is_published);

    assert!(storage
        .delete_faq(faq.id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?);
    assert!(storage
        .get_faq(faq.id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .is_none());

    Ok(())
}

/// Reminder batches against an in-memory reservation store
mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use common::Channels;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;
use ysk_clinic_api::errors::AppError;
use ysk_clinic_api::models::{PatientContact, ReminderKind, Reservation, ReservationStatus};
use ysk_clinic_api::notifications::{KakaoTemplate, SlackRoute};
use ysk_clinic_api::reminder_scheduler::{
    BatchReport, JobRun, ReminderJob, ReminderScheduler, ReservationStore, SchedulerSettings,
};

#[derive(Default)]
struct MemoryStore {
    reservations: Mutex<Vec<Reservation>>,
    fail_queries: AtomicBool,
    query_delay: Option<Duration>,
}

impl MemoryStore {
    fn with(reservations: Vec<Reservation>) -> Self {
        Self {
            reservations: Mutex::new(reservations),
            ..Self::default()
        }
    }

    fn get(&self, id: Uuid) -> Reservation {
        self.reservations
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .unwrap()
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn due_reservations(
        &self,
        date: NaiveDate,
        kind: ReminderKind,
    ) -> Result<Vec<Reservation>, AppError> {
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(AppError::InternalError("connection refused".into()));
        }

        let mut due: Vec<Reservation> = self
            .reservations
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.reservation_date == date && r.status.is_active() && !r.flag(kind))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.reservation_time.cmp(&b.reservation_time));
        Ok(due)
    }

    async fn mark_reminder_sent(&self, reservation_id: Uuid, kind: ReminderKind) -> Result<(), AppError> {
        let mut reservations = self.reservations.lock().unwrap();
        let reservation = reservations
            .iter_mut()
            .find(|r| r.id == reservation_id)
            .ok_or_else(|| AppError::NotFound(format!("reservation {}", reservation_id)))?;
        reservation.set_flag(kind);
        Ok(())
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 11, 2).unwrap()
}

fn reservation(date: NaiveDate, time: &str, status: ReservationStatus, email: Option<&str>) -> Reservation {
    Reservation {
        id: Uuid::new_v4(),
        reservation_date: date,
        reservation_time: time.into(),
        service_type: "cataract".into(),
        status,
        reminder_sent: false,
        today_reminder_sent: false,
        followup_sent: false,
        patient: Some(PatientContact {
            id: Uuid::new_v4(),
            full_name: "김환자".into(),
            phone_number: "010-1234-5678".into(),
            email: email.map(String::from),
        }),
    }
}

fn scheduler(store: Arc<MemoryStore>, channels: &Channels) -> Arc<ReminderScheduler> {
    Arc::new(ReminderScheduler::with_settings(
        store,
        channels.manager(),
        SchedulerSettings::unpaced(),
    ))
}

fn completed(run: JobRun) -> BatchReport {
    match run {
        JobRun::Completed(report) => report,
        JobRun::Skipped { job } => panic!("{} batch was skipped", job.as_str()),
    }
}

#[tokio::test]
async fn tomorrow_reminders_are_sent_once() {
    let tomorrow = today() + ChronoDuration::days(1);
    let with_email = reservation(tomorrow, "10:00", ReservationStatus::Confirmed, Some("a@example.com"));
    let without_email = reservation(tomorrow, "09:00", ReservationStatus::Pending, None);
    let cancelled = reservation(tomorrow, "11:00", ReservationStatus::Cancelled, None);
    let other_day = reservation(today(), "11:00", ReservationStatus::Confirmed, None);
    let mut orphan = reservation(tomorrow, "15:00", ReservationStatus::Confirmed, None);
    orphan.patient = None;

    let store = Arc::new(MemoryStore::with(vec![
        with_email.clone(),
        without_email.clone(),
        cancelled.clone(),
        other_day.clone(),
        orphan.clone(),
    ]));
    let channels = Channels::new();
    let scheduler = scheduler(Arc::clone(&store), &channels);

    let report = completed(scheduler.trigger(ReminderJob::Tomorrow, today()).await.unwrap());

    assert_eq!(report.target_date, tomorrow);
    assert_eq!(report.candidates, 3);
    assert_eq!(report.sent, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped, 1);

    assert_eq!(channels.emails(), 1);
    let kakao = channels.kakao_messages();
    assert_eq!(kakao.len(), 2);
    assert!(kakao.iter().all(|m| m.template == KakaoTemplate::Reminder));

    assert!(store.get(with_email.id).reminder_sent);
    assert!(store.get(without_email.id).reminder_sent);
    assert!(!store.get(cancelled.id).reminder_sent);
    assert!(!store.get(other_day.id).reminder_sent);

    // Summary alert
    let posts = channels.posts();
    assert_eq!(posts.len(), 1);
    assert!(posts[0].text.contains("성공: 2건"));

    let rerun = completed(scheduler.trigger(ReminderJob::Tomorrow, today()).await.unwrap());
    assert_eq!(rerun.candidates, 1);
    assert_eq!(rerun.sent, 0);
    assert_eq!(channels.kakao_messages().len(), 2);
    assert_eq!(channels.posts().len(), 1);
}

#[tokio::test]
async fn undelivered_reminders_stay_due() {
    let tomorrow = today() + ChronoDuration::days(1);
    let booked = reservation(tomorrow, "10:00", ReservationStatus::Confirmed, None);
    let store = Arc::new(MemoryStore::with(vec![booked.clone()]));
    let channels = Channels::new();
    channels.kakao.fail.store(true, Ordering::SeqCst);
    let scheduler = scheduler(Arc::clone(&store), &channels);

    let report = completed(scheduler.trigger(ReminderJob::Tomorrow, today()).await.unwrap());

    assert_eq!(report.sent, 0);
    assert_eq!(report.failed, 1);
    assert!(!store.get(booked.id).reminder_sent);
    // More failures than successes
    assert!(channels.posts()[0].text.starts_with("🟡"));

    channels.kakao.fail.store(false, Ordering::SeqCst);
    let retry = completed(scheduler.trigger(ReminderJob::Tomorrow, today()).await.unwrap());
    assert_eq!(retry.sent, 1);
    assert!(store.get(booked.id).reminder_sent);
}

#[tokio::test]
async fn failed_query_raises_an_urgent_alert() {
    let store = Arc::new(MemoryStore::default());
    store.fail_queries.store(true, Ordering::SeqCst);
    let channels = Channels::new();
    let scheduler = scheduler(Arc::clone(&store), &channels);

    let result = scheduler.trigger(ReminderJob::Tomorrow, today()).await;

    assert!(result.is_err());
    let posts = channels.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].route, SlackRoute::Alerts);
    assert!(posts[0].text.starts_with("🔴"));
}

#[tokio::test]
async fn today_reminders_use_kakao_only() {
    let early = reservation(today(), "09:30", ReservationStatus::Confirmed, Some("a@example.com"));
    let late = reservation(today(), "14:00", ReservationStatus::Pending, None);
    let store = Arc::new(MemoryStore::with(vec![late.clone(), early.clone()]));
    let channels = Channels::new();
    let scheduler = scheduler(Arc::clone(&store), &channels);

    let report = completed(scheduler.trigger(ReminderJob::Today, today()).await.unwrap());

    assert_eq!(report.sent, 2);
    assert_eq!(channels.emails(), 0);
    assert_eq!(channels.kakao_messages().len(), 2);

    let posts = channels.posts();
    assert_eq!(posts.len(), 1);
    assert!(posts[0]
        .text
        .contains("• 09:30 - 김환자 (백내장 상담)\n• 14:00 - 김환자 (백내장 상담)"));

    let marked = store.get(early.id);
    assert!(marked.today_reminder_sent);
    assert!(!marked.reminder_sent);
}

#[tokio::test]
async fn empty_day_sends_nothing() {
    let store = Arc::new(MemoryStore::default());
    let channels = Channels::new();
    let scheduler = scheduler(store, &channels);

    let report = completed(scheduler.trigger(ReminderJob::Today, today()).await.unwrap());

    assert_eq!(report.candidates, 0);
    assert!(channels.posts().is_empty());
    assert!(channels.kakao_messages().is_empty());
}

#[tokio::test]
async fn followup_flags_open_reservations() {
    let open = reservation(today(), "10:00", ReservationStatus::Confirmed, None);
    let done = reservation(today(), "11:00", ReservationStatus::Completed, None);
    let store = Arc::new(MemoryStore::with(vec![open.clone(), done.clone()]));
    let channels = Channels::new();
    let scheduler = scheduler(Arc::clone(&store), &channels);

    let report = completed(scheduler.trigger(ReminderJob::Followup, today()).await.unwrap());

    assert_eq!(report.candidates, 1);
    assert_eq!(report.sent, 1);
    assert!(store.get(open.id).followup_sent);
    assert!(!store.get(done.id).followup_sent);
    assert!(channels.kakao_messages().is_empty());

    let posts = channels.posts();
    assert_eq!(posts.len(), 1);
    assert!(posts[0].text.starts_with("🟡"));

    let rerun = completed(scheduler.trigger(ReminderJob::Followup, today()).await.unwrap());
    assert_eq!(rerun.candidates, 0);
    assert_eq!(channels.posts().len(), 1);
}

#[tokio::test]
async fn overlapping_trigger_is_skipped() {
    let store = Arc::new(MemoryStore {
        query_delay: Some(Duration::from_millis(100)),
        ..MemoryStore::default()
    });
    let channels = Channels::new();
    let scheduler = scheduler(store, &channels);

    let (first, second) = tokio::join!(
        scheduler.trigger(ReminderJob::Today, today()),
        scheduler.trigger(ReminderJob::Today, today()),
    );

    assert!(matches!(first.unwrap(), JobRun::Completed(_)));
    assert_eq!(second.unwrap(), JobRun::Skipped { job: ReminderJob::Today });

    // Other jobs are independent, and the guard is released afterwards
    let (today_run, followup_run) = tokio::join!(
        scheduler.trigger(ReminderJob::Today, today()),
        scheduler.trigger(ReminderJob::Followup, today()),
    );
    assert!(matches!(today_run.unwrap(), JobRun::Completed(_)));
    assert!(matches!(followup_run.unwrap(), JobRun::Completed(_)));
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let channels = Channels::new();
    let scheduler = scheduler(Arc::new(MemoryStore::default()), &channels);

    assert!(!scheduler.is_running());
    assert!(!scheduler.stop());

    assert!(scheduler.start());
    assert!(!scheduler.start());

    let status = scheduler.status();
    assert!(status.running);
    assert!(status.started_at.is_some());
    assert_eq!(status.timezone, "Asia/Seoul");
    let times: Vec<&str> = status.jobs.iter().map(|j| j.time.as_str()).collect();
    assert_eq!(times, vec!["18:00", "09:00", "19:00"]);

    assert!(scheduler.stop());
    assert!(!scheduler.stop());
    assert!(!scheduler.status().running);
}

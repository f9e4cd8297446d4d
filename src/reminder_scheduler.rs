//! Daily reservation reminder jobs.
//!
//! Three jobs fire at fixed clinic-local times: tomorrow's reminders (18:00), today's
//! reminders (09:00) and the no-show follow-up (19:00). Each job can also be
//! triggered manually; a trigger that finds the same job still in flight is skipped.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    clinic_offset, service_type_name, PatientContact, Priority, ReminderKind, Reservation,
};
use crate::notifications::{AppointmentNotification, NotificationConfig, NotificationManager};

/// Reservation queries the reminder jobs depend on.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Active (pending or confirmed) reservations on `date` whose `kind` flag is not set,
    /// ordered by time.
    async fn due_reservations(
        &self,
        date: NaiveDate,
        kind: ReminderKind,
    ) -> Result<Vec<Reservation>, AppError>;

    async fn mark_reminder_sent(&self, reservation_id: Uuid, kind: ReminderKind) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderJob {
    Tomorrow,
    Today,
    Followup,
}

impl ReminderJob {
    pub const ALL: [ReminderJob; 3] = [ReminderJob::Tomorrow, ReminderJob::Today, ReminderJob::Followup];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderJob::Tomorrow => "tomorrow",
            ReminderJob::Today => "today",
            ReminderJob::Followup => "followup",
        }
    }

    fn index(&self) -> usize {
        match self {
            ReminderJob::Tomorrow => 0,
            ReminderJob::Today => 1,
            ReminderJob::Followup => 2,
        }
    }
}

impl std::str::FromStr for ReminderJob {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "tomorrow" => Ok(ReminderJob::Tomorrow),
            "today" => Ok(ReminderJob::Today),
            "followup" => Ok(ReminderJob::Followup),
            other => Err(format!("unknown reminder job '{}' (expected tomorrow, today or followup)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub offset: FixedOffset,
    pub tomorrow_at: NaiveTime,
    pub today_at: NaiveTime,
    pub followup_at: NaiveTime,
    /// Pause between sends in tomorrow's batch.
    pub tomorrow_pacing: Duration,
    /// Pause between sends in today's batch.
    pub today_pacing: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            offset: clinic_offset(),
            tomorrow_at: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
            today_at: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            followup_at: NaiveTime::from_hms_opt(19, 0, 0).unwrap_or_default(),
            tomorrow_pacing: Duration::from_millis(500),
            today_pacing: Duration::from_millis(300),
        }
    }
}

impl SchedulerSettings {
    /// Same schedule without pauses between sends.
    pub fn unpaced() -> Self {
        Self {
            tomorrow_pacing: Duration::ZERO,
            today_pacing: Duration::ZERO,
            ..Self::default()
        }
    }

    fn time_of(&self, job: ReminderJob) -> NaiveTime {
        match job {
            ReminderJob::Tomorrow => self.tomorrow_at,
            ReminderJob::Today => self.today_at,
            ReminderJob::Followup => self.followup_at,
        }
    }
}

/// Outcome counts of one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub job: ReminderJob,
    pub target_date: NaiveDate,
    pub candidates: usize,
    pub sent: usize,
    pub failed: usize,
    /// Rows without a patient contact.
    pub skipped: usize,
}

impl BatchReport {
    fn new(job: ReminderJob, target_date: NaiveDate, candidates: usize) -> Self {
        Self {
            job,
            target_date,
            candidates,
            sent: 0,
            failed: 0,
            skipped: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobRun {
    Completed(BatchReport),
    /// The same job was already in flight.
    Skipped { job: ReminderJob },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job: ReminderJob,
    pub time: String,
    pub next_run: DateTime<FixedOffset>,
    pub in_flight: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub started_at: Option<DateTime<FixedOffset>>,
    pub timezone: &'static str,
    pub jobs: Vec<JobStatus>,
}

#[derive(Default)]
struct SchedulerState {
    started_at: Option<DateTime<FixedOffset>>,
    timers: Vec<JoinHandle<()>>,
}

/// Clears a job's in-flight flag when the run ends, including on panic.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// First instant strictly after `now` whose wall-clock time is `at`.
pub fn next_occurrence(now: DateTime<FixedOffset>, at: NaiveTime) -> DateTime<FixedOffset> {
    let offset = *now.offset();
    let mut candidate = now.date_naive().and_time(at);
    if candidate <= now.naive_local() {
        candidate += ChronoDuration::days(1);
    }
    candidate
        .and_local_timezone(offset)
        .single()
        .unwrap_or_else(|| now + ChronoDuration::days(1))
}

pub struct ReminderScheduler {
    store: Arc<dyn ReservationStore>,
    notifier: Arc<NotificationManager>,
    settings: SchedulerSettings,
    state: Mutex<SchedulerState>,
    in_flight: [AtomicBool; 3],
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn ReservationStore>, notifier: Arc<NotificationManager>) -> Self {
        Self::with_settings(store, notifier, SchedulerSettings::default())
    }

    pub fn with_settings(
        store: Arc<dyn ReservationStore>,
        notifier: Arc<NotificationManager>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            settings,
            state: Mutex::new(SchedulerState::default()),
            in_flight: [AtomicBool::new(false), AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.settings.offset)
    }

    /// Start the three timers. Returns `false` if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut state = self.lock_state();
        if state.started_at.is_some() {
            tracing::warn!("Reminder scheduler already running");
            return false;
        }

        state.timers = ReminderJob::ALL
            .into_iter()
            .map(|job| {
                let scheduler = Arc::clone(self);
                tokio::spawn(async move { scheduler.timer_loop(job).await })
            })
            .collect();
        state.started_at = Some(self.now());

        tracing::info!(
            tomorrow = %self.settings.tomorrow_at.format("%H:%M"),
            today = %self.settings.today_at.format("%H:%M"),
            followup = %self.settings.followup_at.format("%H:%M"),
            "Reminder scheduler started"
        );
        true
    }

    /// Abort the timers. A batch already running completes. Returns `false` if not running.
    pub fn stop(&self) -> bool {
        let mut state = self.lock_state();
        if state.started_at.is_none() {
            tracing::warn!("Reminder scheduler is not running");
            return false;
        }

        for timer in state.timers.drain(..) {
            timer.abort();
        }
        state.started_at = None;

        tracing::info!("Reminder scheduler stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().started_at.is_some()
    }

    pub fn status(&self) -> SchedulerStatus {
        let started_at = self.lock_state().started_at;
        let now = self.now();

        SchedulerStatus {
            running: started_at.is_some(),
            started_at,
            timezone: "Asia/Seoul",
            jobs: ReminderJob::ALL
                .into_iter()
                .map(|job| {
                    let at = self.settings.time_of(job);
                    JobStatus {
                        job,
                        time: at.format("%H:%M").to_string(),
                        next_run: next_occurrence(now, at),
                        in_flight: self.in_flight[job.index()].load(Ordering::Acquire),
                    }
                })
                .collect(),
        }
    }

    async fn timer_loop(self: Arc<Self>, job: ReminderJob) {
        loop {
            let now = self.now();
            let next = next_occurrence(now, self.settings.time_of(job));
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!(job = job.as_str(), next_run = %next, "Reminder job scheduled");

            tokio::time::sleep(wait).await;

            // Run detached so aborting this timer does not cut a batch short
            let scheduler = Arc::clone(&self);
            let today = next.date_naive();
            let run = tokio::spawn(async move { scheduler.trigger(job, today).await });
            if let Err(e) = run.await {
                tracing::error!(job = job.as_str(), "Reminder batch task failed: {}", e);
            }
        }
    }

    /// Run `job` for the clinic date `today` unless it is already in flight.
    pub async fn trigger(&self, job: ReminderJob, today: NaiveDate) -> Result<JobRun, AppError> {
        let flag = &self.in_flight[job.index()];
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(job = job.as_str(), "Reminder job still running, trigger skipped");
            return Ok(JobRun::Skipped { job });
        }
        let _in_flight = InFlight(flag);

        let result = match job {
            ReminderJob::Tomorrow => self.run_tomorrow_reminders(today).await,
            ReminderJob::Today => self.run_today_reminders(today).await,
            ReminderJob::Followup => self.run_followup(today).await,
        };

        match result {
            Ok(report) => {
                tracing::info!(
                    job = job.as_str(),
                    target_date = %report.target_date,
                    candidates = report.candidates,
                    sent = report.sent,
                    failed = report.failed,
                    skipped = report.skipped,
                    "Reminder batch finished"
                );
                Ok(JobRun::Completed(report))
            }
            Err(e) => {
                tracing::error!(job = job.as_str(), "Reminder batch failed: {}", e);
                Err(e)
            }
        }
    }

    async fn pause(pacing: Duration) {
        if !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
    }

    async fn mark(&self, reservation: &Reservation, kind: ReminderKind, report: &mut BatchReport) {
        match self.store.mark_reminder_sent(reservation.id, kind).await {
            Ok(()) => report.sent += 1,
            Err(e) => {
                tracing::error!(reservation_id = %reservation.id, "Failed to set reminder flag: {}", e);
                report.failed += 1;
            }
        }
    }

    /// Email and KakaoTalk reminders for reservations on `today + 1`.
    pub async fn run_tomorrow_reminders(&self, today: NaiveDate) -> Result<BatchReport, AppError> {
        let target = today + ChronoDuration::days(1);

        let reservations = match self.store.due_reservations(target, ReminderKind::DayBefore).await {
            Ok(rows) => rows,
            Err(e) => {
                self.notifier
                    .send_system_alert(
                        &format!("⚠️ 내일 예약 알림 조회 실패 ({}): {}", target, e),
                        Priority::Urgent,
                    )
                    .await;
                return Err(e);
            }
        };

        let mut report = BatchReport::new(ReminderJob::Tomorrow, target, reservations.len());

        for (i, reservation) in reservations.iter().enumerate() {
            if i > 0 {
                Self::pause(self.settings.tomorrow_pacing).await;
            }
            let Some(patient) = &reservation.patient else {
                tracing::warn!(reservation_id = %reservation.id, "Reservation has no patient, reminder skipped");
                report.skipped += 1;
                continue;
            };

            let data = appointment_data(reservation, patient, Priority::Medium);
            let channels = NotificationConfig {
                email: patient.email.is_some(),
                slack: false,
                kakao: true,
            };
            let result = self.notifier.send_appointment_reminder(&data, Some(channels)).await;

            if result.kakao || result.email {
                self.mark(reservation, ReminderKind::DayBefore, &mut report).await;
            } else {
                tracing::warn!(
                    reservation_id = %reservation.id,
                    errors = ?result.errors,
                    "Tomorrow reminder not delivered"
                );
                report.failed += 1;
            }
        }

        if report.sent + report.failed > 0 {
            let priority = if report.failed > report.sent {
                Priority::High
            } else {
                Priority::Medium
            };
            let summary = format!(
                "📅 내일({}) 예약 알림 발송 결과\n• 대상: {}건\n• 성공: {}건\n• 실패: {}건",
                target, report.candidates, report.sent, report.failed
            );
            self.notifier.send_system_alert(&summary, priority).await;
        }

        Ok(report)
    }

    /// Staff overview of today's bookings, then a KakaoTalk reminder per patient.
    pub async fn run_today_reminders(&self, today: NaiveDate) -> Result<BatchReport, AppError> {
        let reservations = self.store.due_reservations(today, ReminderKind::SameDay).await?;
        let mut report = BatchReport::new(ReminderJob::Today, today, reservations.len());
        if reservations.is_empty() {
            return Ok(report);
        }

        let overview = format!(
            "📋 오늘({}) 예약 현황: {}건\n\n{}",
            today,
            reservations.len(),
            schedule_lines(&reservations)
        );
        self.notifier.send_system_alert(&overview, Priority::Medium).await;

        for (i, reservation) in reservations.iter().enumerate() {
            if i > 0 {
                Self::pause(self.settings.today_pacing).await;
            }
            let Some(patient) = &reservation.patient else {
                report.skipped += 1;
                continue;
            };

            let data = appointment_data(reservation, patient, Priority::High);
            let result = self
                .notifier
                .send_appointment_reminder(&data, Some(NotificationConfig::kakao_only()))
                .await;

            if result.kakao {
                self.mark(reservation, ReminderKind::SameDay, &mut report).await;
            } else {
                tracing::warn!(
                    reservation_id = %reservation.id,
                    errors = ?result.errors,
                    "Same-day reminder not delivered"
                );
                report.failed += 1;
            }
        }

        Ok(report)
    }

    /// Flag today's still-open reservations as possible no-shows for staff.
    pub async fn run_followup(&self, today: NaiveDate) -> Result<BatchReport, AppError> {
        let reservations = self.store.due_reservations(today, ReminderKind::FollowUp).await?;
        let mut report = BatchReport::new(ReminderJob::Followup, today, reservations.len());
        if reservations.is_empty() {
            return Ok(report);
        }

        let alert = format!(
            "⚠️ 오늘({}) 미처리 예약 {}건, 노쇼 여부를 확인해주세요.\n\n{}",
            today,
            reservations.len(),
            schedule_lines(&reservations)
        );
        self.notifier.send_system_alert(&alert, Priority::High).await;

        for reservation in &reservations {
            self.mark(reservation, ReminderKind::FollowUp, &mut report).await;
        }

        Ok(report)
    }
}

fn appointment_data(
    reservation: &Reservation,
    patient: &PatientContact,
    priority: Priority,
) -> AppointmentNotification {
    AppointmentNotification {
        patient_name: patient.full_name.clone(),
        phone_number: patient.phone_number.clone(),
        email: patient.email.clone(),
        appointment_date: reservation.reservation_date.format("%Y-%m-%d").to_string(),
        appointment_time: reservation.reservation_time.clone(),
        service_type: Some(service_type_name(&reservation.service_type).to_string()),
        doctor_name: None,
        notes: None,
        priority,
    }
}

/// `• HH:MM - name (service)` per reservation.
fn schedule_lines(reservations: &[Reservation]) -> String {
    reservations
        .iter()
        .map(|r| {
            let name = r
                .patient
                .as_ref()
                .map(|p| p.full_name.as_str())
                .unwrap_or("환자 정보 없음");
            format!(
                "• {} - {} ({})",
                r.reservation_time,
                name,
                service_type_name(&r.service_type)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

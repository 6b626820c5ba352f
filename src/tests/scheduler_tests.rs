//! tests/scheduler_tests.rs
//! Pasadas del scheduler: selección de vencidos, claim exclusivo, agrupado
//! por campaña y canal, y liberación ante errores.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use tokio::sync::mpsc;

use crate::models::campaign_model::{CampaignStatus, ChannelKind};
use crate::services::delivery_worker::{DispatchBatch, DispatchQueue};
use crate::services::entry_service::EntryStore;
use crate::services::scheduler_service::SchedulerService;
use crate::tests::support::Fixture;

struct Harness {
    scheduler: SchedulerService,
    email_rx: mpsc::Receiver<DispatchBatch>,
    chat_rx: mpsc::Receiver<DispatchBatch>,
}

fn harness(fixture: &Fixture) -> Harness {
    let (email_queue, email_rx) = DispatchQueue::new(ChannelKind::Email, 16);
    let (chat_queue, chat_rx) = DispatchQueue::new(ChannelKind::Chat, 16);
    Harness {
        scheduler: SchedulerService::new(
            fixture.entries.clone(),
            fixture.campaigns.clone(),
            email_queue,
            chat_queue,
        ),
        email_rx,
        chat_rx,
    }
}

#[actix_rt::test]
async fn pass_picks_only_due_entries() {
    let fixture = Fixture::new().await;
    let mut h = harness(&fixture);
    let campaign_id = fixture.create_campaign(true, false).await;

    let now = Utc::now();
    let (_, due_a) = fixture
        .add_recipient(campaign_id, ChannelKind::Email, now - Duration::minutes(5))
        .await;
    let (_, due_b) = fixture
        .add_recipient(campaign_id, ChannelKind::Email, now)
        .await;
    let (_, later) = fixture
        .add_recipient(campaign_id, ChannelKind::Email, now + Duration::hours(1))
        .await;

    let summary = h.scheduler.process_campaigns(now).await.unwrap();
    assert_eq!(summary.claimed, 2);
    assert_eq!(summary.batches, 1);

    let batch = h.email_rx.try_recv().unwrap();
    let ids: Vec<i64> = batch.messages.iter().map(|m| m.entry().id).collect();
    assert_eq!(ids, vec![due_a, due_b]);
    assert!(batch.messages.iter().all(|m| m.entry().context.is_some()));

    assert_eq!(fixture.processing_flag(due_a).await, Some(true));
    assert_eq!(fixture.processing_flag(later).await, Some(false));

    // Los ya bloqueados no se vuelven a tomar
    let again = h.scheduler.process_campaigns(Utc::now()).await.unwrap();
    assert_eq!(again.claimed, 0);
    assert!(h.email_rx.try_recv().is_err());
}

#[actix_rt::test]
async fn concurrent_claims_never_share_an_entry() {
    let fixture = Fixture::new().await;
    let campaign_id = fixture.create_campaign(true, false).await;
    for _ in 0..20 {
        fixture
            .add_recipient(campaign_id, ChannelKind::Email, Utc::now() - Duration::seconds(1))
            .await;
    }

    let now = Utc::now();
    let first = fixture.entries.list_due(now).await.unwrap();
    let second = fixture.entries.list_due(now).await.unwrap();
    assert_eq!(first.len(), 20);

    let (a, b) = tokio::join!(fixture.entries.claim(first), fixture.entries.claim(second));
    let a: HashSet<i64> = a.unwrap().iter().map(|entry| entry.id).collect();
    let b: HashSet<i64> = b.unwrap().iter().map(|entry| entry.id).collect();

    assert!(a.is_disjoint(&b));
    assert_eq!(a.len() + b.len(), 20);
}

#[actix_rt::test]
async fn campaign_is_split_by_channel_and_started_once() {
    let fixture = Fixture::new().await;
    let mut h = harness(&fixture);
    let campaign_id = fixture.create_campaign(true, true).await;

    let due = Utc::now() - Duration::seconds(1);
    fixture.add_recipient(campaign_id, ChannelKind::Email, due).await;
    fixture.add_recipient(campaign_id, ChannelKind::Email, due).await;
    fixture.add_recipient(campaign_id, ChannelKind::Chat, due).await;

    let summary = h.scheduler.process_campaigns(Utc::now()).await.unwrap();
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.campaigns_started, 1);

    let email = h.email_rx.try_recv().unwrap();
    let chat = h.chat_rx.try_recv().unwrap();
    assert_eq!((email.channel, email.messages.len()), (ChannelKind::Email, 2));
    assert_eq!((chat.channel, chat.messages.len()), (ChannelKind::Chat, 1));
    assert_eq!(
        fixture.campaigns.get_status(campaign_id).await.unwrap(),
        CampaignStatus::InProgress
    );

    // Una segunda pasada de la misma campaña no vuelve a cambiar el estado
    fixture.add_recipient(campaign_id, ChannelKind::Email, due).await;
    let second = h.scheduler.process_campaigns(Utc::now()).await.unwrap();
    assert_eq!(second.batches, 1);
    assert_eq!(second.campaigns_started, 0);
}

#[actix_rt::test]
async fn context_failure_aborts_pass_and_releases_pending() {
    let fixture = Fixture::new().await;
    let mut h = harness(&fixture);
    let healthy = fixture.create_campaign(true, false).await;
    let broken = fixture.create_campaign(true, false).await;

    let due = Utc::now() - Duration::seconds(1);
    let (_, healthy_entry) = fixture.add_recipient(healthy, ChannelKind::Email, due).await;
    // Otro dueño: el contexto de la campaña no se puede cargar para este entry
    let (_, broken_entry) = fixture
        .add_recipient_for(broken, 99, ChannelKind::Email, due)
        .await;

    let outcome = h.scheduler.process_campaigns(Utc::now()).await;
    assert!(outcome.is_err());

    // Lo ya encolado sigue su curso; lo demás vuelve a la cola
    let batch = h.email_rx.try_recv().unwrap();
    assert_eq!(batch.campaign.id, healthy);
    assert_eq!(fixture.processing_flag(healthy_entry).await, Some(true));
    assert_eq!(fixture.processing_flag(broken_entry).await, Some(false));
}

#[actix_rt::test]
async fn launch_skips_future_entries() {
    let fixture = Fixture::new().await;
    let mut h = harness(&fixture);
    let campaign_id = fixture.create_campaign(true, false).await;
    let other = fixture.create_campaign(true, false).await;

    let (_, now_entry) = fixture
        .add_recipient(campaign_id, ChannelKind::Email, Utc::now() - Duration::seconds(1))
        .await;
    let (_, future_entry) = fixture
        .add_recipient(campaign_id, ChannelKind::Email, Utc::now() + Duration::days(1))
        .await;
    let (_, other_entry) = fixture
        .add_recipient(other, ChannelKind::Email, Utc::now() - Duration::seconds(1))
        .await;

    let summary = h.scheduler.launch_campaign(campaign_id).await.unwrap();
    assert_eq!(summary.claimed, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.batches, 1);

    let batch = h.email_rx.try_recv().unwrap();
    assert_eq!(batch.messages.len(), 1);
    assert_eq!(batch.messages[0].entry().id, now_entry);
    assert_eq!(fixture.processing_flag(future_entry).await, Some(false));
    assert_eq!(fixture.processing_flag(other_entry).await, Some(false));
}

#[actix_rt::test]
async fn closed_queue_releases_batch() {
    let fixture = Fixture::new().await;
    let h = harness(&fixture);
    let campaign_id = fixture.create_campaign(true, false).await;
    let (_, entry_id) = fixture
        .add_recipient(campaign_id, ChannelKind::Email, Utc::now() - Duration::seconds(1))
        .await;

    let Harness {
        scheduler,
        email_rx,
        chat_rx: _chat_rx,
    } = h;
    drop(email_rx);

    let summary = scheduler.process_campaigns(Utc::now()).await.unwrap();
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.batches, 0);
    assert_eq!(fixture.processing_flag(entry_id).await, Some(false));
}

#[actix_rt::test]
async fn failed_claim_unlocks_entries_taken_earlier() {
    let fixture = Fixture::new().await;
    let h = harness(&fixture);
    let campaign_id = fixture.create_campaign(true, false).await;

    let due = Utc::now() - Duration::seconds(5);
    let (_, first) = fixture
        .add_recipient(campaign_id, ChannelKind::Email, due)
        .await;
    let (_, second) = fixture
        .add_recipient(campaign_id, ChannelKind::Email, due + Duration::seconds(1))
        .await;

    // La base rechaza el bloqueo del segundo entry a mitad del claim
    sqlx::query(&format!(
        "CREATE TRIGGER reject_second_claim BEFORE UPDATE OF processing ON entries \
         WHEN NEW.id = {second} AND NEW.processing = 1 \
         BEGIN SELECT RAISE(ABORT, 'bloqueo rechazado'); END"
    ))
    .execute(&fixture.pool)
    .await
    .unwrap();

    let outcome = h.scheduler.process_campaigns(Utc::now()).await;
    assert!(outcome.is_err());

    assert_eq!(fixture.processing_flag(first).await, Some(false));
    assert_eq!(fixture.processing_flag(second).await, Some(false));

    // Ambos siguen visibles para el próximo tick
    let due_ids: Vec<i64> = fixture
        .entries
        .list_due(Utc::now())
        .await
        .unwrap()
        .iter()
        .map(|entry| entry.id)
        .collect();
    assert_eq!(due_ids, vec![first, second]);
}

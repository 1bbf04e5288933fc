use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use reconciler::notifications::{
    templates, DispatcherSettings, EmailVars, Mailer, NotificationDispatcher, NotificationJob,
    OutboundEmail, MAIL_TIMEOUT,
};
use tokio::sync::Semaphore;

#[derive(Default)]
struct CapturingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send(&self, email: OutboundEmail) -> anyhow::Result<()> {
        if email.to.starts_with("bounce") {
            return Err(anyhow!("mailbox unavailable"));
        }
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

/// Holds every send until a permit is released.
struct GatedMailer {
    gate: Semaphore,
    started: AtomicUsize,
    delivered: AtomicUsize,
}

#[async_trait]
impl Mailer for GatedMailer {
    async fn send(&self, _email: OutboundEmail) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await?.forget();
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Never answers for `stuck@` recipients.
#[derive(Default)]
struct HangingMailer {
    delivered: Mutex<Vec<String>>,
}

#[async_trait]
impl Mailer for HangingMailer {
    async fn send(&self, email: OutboundEmail) -> anyhow::Result<()> {
        if email.to.starts_with("stuck") {
            std::future::pending::<()>().await;
        }
        self.delivered.lock().unwrap().push(email.to);
        Ok(())
    }
}

fn job(recipient: &str) -> NotificationJob {
    NotificationJob::new(
        templates::CREATE_ORDER,
        recipient,
        EmailVars {
            display_name: "Ana".to_string(),
            pets: vec!["Luna".to_string()],
            pay_url: "https://pay.example.com/?orderId=1".to_string(),
            days_left: 0,
        },
    )
}

// key: notification-tests -> delivery + failure isolation
#[tokio::test]
async fn dispatcher_renders_and_delivers_jobs() {
    let mailer = Arc::new(CapturingMailer::default());
    let dispatcher = NotificationDispatcher::start(mailer.clone(), DispatcherSettings::default());
    let handle = dispatcher.handle();

    handle.enqueue(job("ana@example.com")).await;
    handle.enqueue(job("bounce@example.com")).await;
    handle.enqueue(job("luis@example.com")).await;
    drop(handle);
    dispatcher.shutdown().await;

    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    let ana = sent.iter().find(|email| email.to == "ana@example.com").unwrap();
    assert_eq!(ana.subject, "💙 Mantén tu cobertura Appa activa");
    assert_eq!(ana.template, "Cuota creada");
    assert_eq!(ana.variables["display_name"], "Ana");
    assert!(!ana.variables.contains_key("days_left"));
}

#[tokio::test]
async fn full_queue_blocks_producer_without_dropping() {
    let mailer = Arc::new(GatedMailer {
        gate: Semaphore::new(0),
        started: AtomicUsize::new(0),
        delivered: AtomicUsize::new(0),
    });
    let dispatcher = NotificationDispatcher::start(
        mailer.clone(),
        DispatcherSettings {
            capacity: 100,
            workers: 5,
        },
    );
    let handle = dispatcher.handle();

    // Occupy every worker.
    for n in 0..5 {
        handle.enqueue(job(&format!("worker{n}@example.com"))).await;
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while mailer.started.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("workers never picked up their jobs");

    // Fill the queue.
    tokio::time::timeout(Duration::from_secs(5), async {
        for n in 0..100 {
            handle.enqueue(job(&format!("queued{n}@example.com"))).await;
        }
    })
    .await
    .expect("queue accepted fewer jobs than its capacity");

    // The next producer waits for a free slot.
    let blocked_handle = handle.clone();
    let blocked = tokio::spawn(async move {
        blocked_handle.enqueue(job("late@example.com")).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished());
    assert_eq!(mailer.delivered.load(Ordering::SeqCst), 0);

    mailer.gate.add_permits(200);
    tokio::time::timeout(Duration::from_secs(5), blocked)
        .await
        .expect("producer stayed blocked after workers freed up")
        .unwrap();

    drop(handle);
    dispatcher.shutdown().await;
    assert_eq!(mailer.delivered.load(Ordering::SeqCst), 106);
}

#[tokio::test(start_paused = true)]
async fn hung_send_is_abandoned_after_mail_timeout() {
    let mailer = Arc::new(HangingMailer::default());
    let dispatcher = NotificationDispatcher::start(
        mailer.clone(),
        DispatcherSettings {
            capacity: 4,
            workers: 1,
        },
    );
    let handle = dispatcher.handle();
    let started = tokio::time::Instant::now();

    handle.enqueue(job("stuck@example.com")).await;
    handle.enqueue(job("ana@example.com")).await;

    tokio::time::sleep(MAIL_TIMEOUT - Duration::from_secs(1)).await;
    assert!(mailer.delivered.lock().unwrap().is_empty());

    drop(handle);
    dispatcher.shutdown().await;
    assert!(started.elapsed() >= MAIL_TIMEOUT);
    assert_eq!(
        *mailer.delivered.lock().unwrap(),
        vec!["ana@example.com".to_string()]
    );
}

#[tokio::test]
async fn enqueue_after_shutdown_is_logged_not_fatal() {
    let (handle, receiver) = reconciler::notifications::channel(1);
    drop(receiver);
    handle.enqueue(job("ana@example.com")).await;
}

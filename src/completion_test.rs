use std::time::Duration;

use crate::Completion;

#[tokio::test]
async fn test_fulfill_wakes_every_waiter() {
    let completion: Completion<u32, String> = Completion::new();
    let a = completion.clone();
    let b = completion.clone();

    let waiter_a = tokio::spawn(async move { a.wait().await });
    let waiter_b = tokio::spawn(async move { b.await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!completion.is_settled());
    assert!(completion.fulfill(7));

    assert_eq!(waiter_a.await.unwrap(), Ok(7));
    assert_eq!(waiter_b.await.unwrap(), Ok(7));
}

#[tokio::test]
async fn test_first_settlement_wins() {
    let completion: Completion<u32, String> = Completion::new();

    assert!(completion.reject("boom".to_string()));
    assert!(!completion.fulfill(1));
    assert!(!completion.reject("again".to_string()));

    assert_eq!(completion.wait().await, Err("boom".to_string()));
    assert_eq!(completion.peek(), Some(Err("boom".to_string())));
}

#[tokio::test]
async fn test_wait_after_settlement_returns_immediately() {
    let completion: Completion<&'static str, ()> = Completion::fulfilled("ready");

    assert!(completion.is_settled());
    assert_eq!(completion.wait().await, Ok("ready"));
    assert_eq!(completion.wait().await, Ok("ready"));
}

#[test]
fn test_clones_share_identity() {
    let completion: Completion<u8, ()> = Completion::new();
    let clone = completion.clone();
    let other: Completion<u8, ()> = Completion::new();

    assert!(completion.ptr_eq(&clone));
    assert!(!completion.ptr_eq(&other));

    clone.fulfill(3);
    assert!(completion.is_settled());
    assert!(!other.is_settled());
    assert_eq!(completion.peek(), Some(Ok(3)));
}

#[test]
fn test_rejected_constructor() {
    let completion: Completion<u8, &'static str> = Completion::rejected("nope");
    assert!(completion.is_settled());
    assert_eq!(completion.peek(), Some(Err("nope")));
}

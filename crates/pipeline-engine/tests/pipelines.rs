//! End-to-end pipelines built from the public API

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pipeline_engine::viz::render_mermaid;
use pipeline_engine::{
    async_node_fn, node_fn, BoundedSpawner, ContextualForkSequence, ContextualSequence, Node,
    NodeExt, NodeKey, NodeShape, PipelineError, PredicateNode, Result, SequenceContext,
    SwitchNode,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct OrderKeys {
    quantity: NodeKey<u32>,
    unit_price_cents: NodeKey<u64>,
    total_cents: NodeKey<u64>,
    decision: NodeKey<String>,
}

fn order_keys() -> OrderKeys {
    OrderKeys {
        quantity: NodeKey::new("quantity"),
        unit_price_cents: NodeKey::new("unitPrice"),
        total_cents: NodeKey::new("total"),
        decision: NodeKey::new("decision"),
    }
}

fn approval_workflow(keys: &OrderKeys) -> ContextualSequence<u32> {
    let quantity = keys.quantity.clone();
    let unit_price = keys.unit_price_cents.clone();

    let review = PredicateNode::new(
        |total: &u64| *total > 10_000,
        node_fn(|_: u64| Ok("Requires Manual Review".to_string())),
        node_fn(|_: u64| Ok("Auto-Approved".to_string())),
    );

    ContextualSequence::builder(keys.quantity.clone())
        .with_id("order-approval")
        .then_compute(
            keys.total_cents.clone(),
            node_fn(move |ctx: SequenceContext| {
                let quantity = ctx.require(&quantity)?;
                let unit_price = ctx.require(&unit_price)?;
                Ok(unit_price * u64::from(quantity))
            }),
        )
        .then_map(keys.total_cents.clone(), keys.decision.clone(), review)
        .build()
}

fn seeded_order(keys: &OrderKeys, quantity: u32) -> SequenceContext {
    SequenceContext::empty()
        .put(&keys.quantity, quantity)
        .and_then(|ctx| ctx.put(&keys.unit_price_cents, 1999))
        .unwrap()
}

#[tokio::test]
async fn large_order_requires_manual_review() {
    init_logging();
    let keys = order_keys();
    let workflow = approval_workflow(&keys);

    let ctx = workflow.resume(seeded_order(&keys, 10)).await.unwrap();
    assert_eq!(ctx.get(&keys.total_cents), Some(19_990));
    assert_eq!(
        ctx.get(&keys.decision).as_deref(),
        Some("Requires Manual Review")
    );
}

#[tokio::test]
async fn small_order_is_auto_approved() {
    let keys = order_keys();
    let workflow = approval_workflow(&keys);

    let ctx = workflow.resume(seeded_order(&keys, 2)).await.unwrap();
    assert_eq!(ctx.get(&keys.total_cents), Some(3998));
    assert_eq!(ctx.get(&keys.decision).as_deref(), Some("Auto-Approved"));
}

#[tokio::test]
async fn missing_price_fails_the_workflow() {
    let keys = order_keys();
    let workflow = approval_workflow(&keys);

    let err = workflow.apply(3).await.unwrap_err();
    assert!(matches!(err, PipelineError::MissingValue(ref id) if id == "unitPrice"));
}

fn lookup_fork(
    ids: &NodeKey<Vec<String>>,
    id: &NodeKey<String>,
    results: &NodeKey<Vec<String>>,
) -> ContextualForkSequence<String> {
    let item = id.clone();
    let out = results.clone();
    let branch = async_node_fn(move |ctx: SequenceContext| {
        let item = item.clone();
        let out = out.clone();
        async move {
            let id = ctx.require(&item)?;
            // Stagger completion so the first item finishes last
            let delay = if id == "id-1" { 30 } else { 1 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            ctx.put(&out, vec![format!("result for {id}")])
        }
    });
    ContextualForkSequence::new(ids.clone(), id.clone(), branch)
}

#[tokio::test]
async fn contextual_fork_collects_one_result_per_item_in_both_modes() {
    init_logging();
    let ids: NodeKey<Vec<String>> = NodeKey::new("ids");
    let id: NodeKey<String> = NodeKey::new("id");
    let results: NodeKey<Vec<String>> = NodeKey::new("results");

    let start = SequenceContext::empty()
        .put(&ids, vec!["id-1".to_string(), "id-2".to_string()])
        .unwrap();

    let sequential = lookup_fork(&ids, &id, &results).sequential();
    let parallel = lookup_fork(&ids, &id, &results);
    let bounded = lookup_fork(&ids, &id, &results).with_spawner(Arc::new(BoundedSpawner::new(1)));

    let expected = vec!["result for id-1", "result for id-2"];
    for fork in [&sequential, &parallel, &bounded] {
        let ctx = fork.apply(start.clone()).await.unwrap();
        assert_eq!(ctx.get(&results).unwrap(), expected);
        assert!(!ctx.contains(&id));
    }
}

#[tokio::test]
async fn nested_forks_merge_each_level_once() {
    let groups: NodeKey<Vec<Vec<u32>>> = NodeKey::new("groups");
    let group: NodeKey<Vec<u32>> = NodeKey::new("group");
    let value: NodeKey<u32> = NodeKey::new("value");
    let squares: NodeKey<Vec<u32>> = NodeKey::new("squares");

    let out = squares.clone();
    let item = value.clone();
    let inner = ContextualForkSequence::new(
        group.clone(),
        value.clone(),
        node_fn(move |ctx: SequenceContext| {
            let v = ctx.require(&item)?;
            ctx.put(&out, vec![v * v])
        }),
    );
    let outer = ContextualForkSequence::new(groups.clone(), group.clone(), inner);

    let start = SequenceContext::empty()
        .put(&groups, vec![vec![1, 2], vec![3]])
        .and_then(|ctx| ctx.put(&squares, vec![0]))
        .unwrap();
    let ctx = outer.apply(start).await.unwrap();

    assert_eq!(ctx.get(&squares), Some(vec![0, 1, 4, 9]));
    assert!(!ctx.contains(&group));
    assert!(!ctx.contains(&value));
}

#[tokio::test]
async fn resilience_wrappers_compose() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let flaky = async_node_fn(move |n: u32| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if attempt < 3 {
                Err(PipelineError::failed(format!("transient {attempt}")))
            } else {
                Ok(n * 2)
            }
        }
    });

    let pipeline = flaky
        .timeout(Duration::from_secs(1))
        .retry(5)
        .or_else(node_fn(|_: u32| Ok(0_u32)));

    assert_eq!(pipeline.apply(21).await.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let always_down = node_fn(|_: u32| -> Result<u32> { Err(PipelineError::failed("down")) })
        .retry(2)
        .or_else(node_fn(|_: u32| Ok(7_u32)));
    assert_eq!(always_down.apply(1).await.unwrap(), 7);
}

#[tokio::test]
async fn switch_inside_contextual_sequence_renders() {
    let tier: NodeKey<String> = NodeKey::new("tier");
    let spend: NodeKey<u32> = NodeKey::new("spend");

    let classify = SwitchNode::new(
        |spend: &u32| *spend / 1000,
        |bucket: &u32| match *bucket {
            0 => "bronze".to_string(),
            1..=4 => "silver".to_string(),
            _ => "gold".to_string(),
        },
        node_fn(|_: u32| Ok("gold tier".to_string())).named("gold"),
    )
    .case("bronze", node_fn(|_: u32| Ok("bronze tier".to_string())).named("bronze"))
    .case("silver", node_fn(|_: u32| Ok("silver tier".to_string())).named("silver"));

    let seq = ContextualSequence::builder(spend.clone())
        .then_map(spend, tier.clone(), classify)
        .build();

    let ctx = seq.apply(2500).await.unwrap();
    assert_eq!(ctx.get(&tier).as_deref(), Some("silver tier"));

    let shape = seq.shape();
    assert!(matches!(shape, NodeShape::Sequence { ref steps } if steps.len() == 1));
    let diagram = render_mermaid(&shape);
    assert!(diagram.starts_with("flowchart TD\n"));
    assert!(diagram.contains("\"bronze\""));
    assert!(diagram.contains("-- \"default\" -->"));
}

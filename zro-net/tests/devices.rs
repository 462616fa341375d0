mod common;

use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use zro_core::{CallError, Exposed, RemoteObject};
use zro_net::{
    Collects, Consumer, Context, PipelineConfig, Processes, Producer, Publisher, PublisherConfig,
    Publishes, ServerConfig, Sink, Subscriber, Subscribes,
};

use common::{local_config, spawn_with, wait_for};

#[derive(Default)]
struct Ticker {
    n: u64,
}

impl RemoteObject for Ticker {
    fn expose(members: Exposed<Self>) -> Exposed<Self> {
        members.read_only("n", |t| t.n)
    }
}

impl Publishes for Ticker {
    fn next_message(&mut self) -> Option<Value> {
        self.n += 1;
        Some(json!(self.n))
    }
}

#[derive(Default)]
struct Listener {
    count: u64,
    last: Option<Value>,
}

impl RemoteObject for Listener {
    fn expose(members: Exposed<Self>) -> Exposed<Self> {
        members
            .read_only("count", |l| l.count)
            .read_only("last", |l| l.last.clone())
    }
}

impl Subscribes for Listener {
    fn handle_message(&mut self, _source: &str, message: Value) {
        self.count += 1;
        self.last = Some(message);
    }
}

fn local_publisher(hwm: i32) -> PublisherConfig {
    PublisherConfig {
        ip: "127.0.0.1".to_string(),
        hwm,
        ..Default::default()
    }
}

fn local_pipeline() -> PipelineConfig {
    PipelineConfig {
        ip: "127.0.0.1".to_string(),
        ..Default::default()
    }
}

#[test]
fn hwm_one_never_blocks_and_keeps_newest() {
    let ctx = Context::new();
    let mut publisher = Publisher::new(&ctx, local_publisher(1)).unwrap();
    let mut subscriber = Subscriber::new(&ctx);
    subscriber
        .add_subscription("127.0.0.1", publisher.port(), 1)
        .unwrap();
    let mut listener = Listener::default();

    // subscriptions take a moment to become live
    assert!(wait_for(Duration::from_secs(5), || {
        publisher.publish_value(&json!(0)).unwrap();
        subscriber.drain(&mut listener).unwrap() > 0
    }));

    let started = Instant::now();
    for i in 1..=10_000 {
        publisher.publish_value(&json!(i)).unwrap();
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    thread::sleep(Duration::from_millis(200));
    assert!(subscriber.drain(&mut listener).unwrap() <= 1);

    publisher.publish_value(&json!(-1)).unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(subscriber.drain(&mut listener).unwrap(), 1);
    assert_eq!(listener.last, Some(json!(-1)));
}

#[test]
fn subscriptions_are_managed_remotely() {
    let config = ServerConfig {
        update_interval_ms: 20,
        ..local_config()
    };
    let ticker = spawn_with(Ticker::default(), config, |s| {
        let publisher = Publisher::new(s.context(), local_publisher(10))?;
        s.add_role(Box::new(publisher))
    });
    let listener = spawn_with(Listener::default(), local_config(), |s| {
        let subscriber = Subscriber::new(s.context());
        s.add_role(Box::new(subscriber))
    });

    let ctx = Context::new();
    let mut ticker_proxy = ticker.proxy(&ctx);
    let mut listener_proxy = listener.proxy(&ctx);

    let pub_port: u16 = ticker_proxy.get_as("pub_port").unwrap();
    assert_eq!(ticker_proxy.get_value("publishing").unwrap(), json!(false));
    ticker_proxy.set("publishing", true).unwrap();

    listener_proxy
        .call("add_subscription", vec![json!("127.0.0.1"), json!(pub_port), json!(10)])
        .unwrap();
    assert!(wait_for(Duration::from_secs(5), || {
        listener_proxy.get_as::<u64>("count").unwrap() > 2
    }));

    let subscriptions: Vec<String> = listener_proxy.call_as("get_subscriptions", vec![]).unwrap();
    assert_eq!(subscriptions, vec![format!("tcp://127.0.0.1:{}", pub_port)]);
    let removed: usize = listener_proxy
        .call_as("remove_subscription", vec![json!("127.0.0.1")])
        .unwrap();
    assert_eq!(removed, 1);

    // explicit publish with publishing turned off
    ticker_proxy.set("publishing", false).unwrap();
    assert_eq!(ticker_proxy.call("publish", vec![json!("x")]).unwrap(), json!(true));
}

#[derive(Default)]
struct Feeder;

impl RemoteObject for Feeder {
    fn expose(members: Exposed<Self>) -> Exposed<Self> {
        members
    }
}

#[derive(Default)]
struct Doubler;

impl RemoteObject for Doubler {
    fn expose(members: Exposed<Self>) -> Exposed<Self> {
        members
    }
}

impl Processes for Doubler {
    fn process(&mut self, work: Value) -> Result<Value, CallError> {
        let n: i64 = serde_json::from_value(work)?;
        Ok(json!(n * 2))
    }
}

#[derive(Default)]
struct Collector {
    data: BTreeMap<String, Value>,
    batches: Vec<String>,
}

impl RemoteObject for Collector {
    fn expose(members: Exposed<Self>) -> Exposed<Self> {
        members
            .read_only("data", |c| c.data.clone())
            .read_only("batches", |c| c.batches.clone())
    }
}

impl Collects for Collector {
    fn handle_data(&mut self, key: &str, data: Value) {
        self.data.insert(key.to_string(), data);
    }

    fn batch_started(&mut self, name: &str) {
        self.batches.push(format!("start {}", name));
    }

    fn batch_ended(&mut self, name: &str) {
        self.batches.push(format!("end {}", name));
    }
}

#[test]
fn work_flows_through_pipeline() {
    let sink = spawn_with(Collector::default(), local_config(), |s| {
        let sink = Sink::new(s.context(), &local_pipeline())?;
        s.add_role(Box::new(sink))
    });
    let consumer = spawn_with(Doubler, local_config(), |s| {
        let consumer = Consumer::new(s.context());
        s.add_role(Box::new(consumer))
    });
    let producer = spawn_with(Feeder, local_config(), |s| {
        let producer = Producer::new(s.context(), local_pipeline())?;
        s.add_role(Box::new(producer))
    });

    let ctx = Context::new();
    let mut sink_proxy = sink.proxy(&ctx);
    let mut consumer_proxy = consumer.proxy(&ctx);
    let mut producer_proxy = producer.proxy(&ctx);

    let pull_port: u16 = sink_proxy.get_as("pull_port").unwrap();
    let push_port: u16 = producer_proxy.get_as("push_port").unwrap();
    consumer_proxy
        .call("set_source", vec![json!("127.0.0.1"), json!(push_port)])
        .unwrap();
    consumer_proxy
        .call("set_sink", vec![json!("127.0.0.1"), json!(pull_port)])
        .unwrap();
    producer_proxy
        .call("set_sink", vec![json!("127.0.0.1"), json!(sink.port)])
        .unwrap();
    producer_proxy.call("start_batch", vec![json!("run1")]).unwrap();
    assert_eq!(sink_proxy.get_value("batch").unwrap(), json!("run1"));

    // pushing fails until the consumer's connection is up
    assert!(wait_for(Duration::from_secs(5), || {
        producer_proxy
            .call("push", vec![json!(1), json!("w1")])
            .is_ok()
    }));
    for i in 2..=5 {
        producer_proxy
            .call("push", vec![json!(i), json!(format!("w{}", i))])
            .unwrap();
    }

    assert!(wait_for(Duration::from_secs(5), || {
        let data: BTreeMap<String, Value> = sink_proxy.get_as("data").unwrap();
        data.len() == 5
    }));
    let data: BTreeMap<String, Value> = sink_proxy.get_as("data").unwrap();
    assert!(data.keys().all(|k| k.starts_with("run1_w")));
    let total: i64 = data.values().map(|v| v.as_i64().unwrap()).sum();
    assert_eq!(total, 30);

    producer_proxy.call("end_batch", vec![]).unwrap();
    assert_eq!(sink_proxy.get_value("batch").unwrap(), json!("0"));
    let batches: Vec<String> = sink_proxy.get_as("batches").unwrap();
    assert_eq!(batches, vec!["start run1", "end run1"]);

    assert_eq!(
        consumer_proxy.get_value("source").unwrap(),
        json!(format!("tcp://127.0.0.1:{}", push_port))
    );
}

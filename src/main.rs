//! udthread-demo - driver programs for the udthread runtime
//!
//! Each scenario starts a fresh runtime on the main thread, runs a few
//! logical threads through it and shuts it down again.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::{Parser, ValueEnum};
use log::LevelFilter;

use udthread::{console, Mailbox, Priority, Runtime, RuntimeConfig, Semaphore, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Two high-priority threads and one low-priority thread yielding
    Priority,
    /// Producer and consumer synchronized by semaphores
    Semaphore,
    /// Producers and a consumer sharing an anonymous mailbox
    Mailbox,
    /// Targeted send/receive with sender filters
    Messages,
    /// Synchronous hand-off with block_send
    Handoff,
    /// Every scenario in turn
    All,
}

#[derive(Parser)]
#[command(name = "udthread-demo")]
#[command(about = "Demonstration driver for the udthread runtime", long_about = None)]
struct Cli {
    /// Scenario to run
    #[arg(value_enum, default_value_t = Scenario::All)]
    scenario: Scenario,

    /// Preemption quantum in milliseconds (0 disables preemption)
    #[arg(short, long)]
    quantum_ms: Option<u64>,

    /// Log level for runtime diagnostics
    #[arg(short, long, default_value = "warn")]
    log_level: LevelFilter,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    console::init(cli.log_level);

    let mut config = RuntimeConfig::from_env();
    if let Some(ms) = cli.quantum_ms {
        config = config.with_quantum(Duration::from_millis(ms));
    }

    let scenarios = match cli.scenario {
        Scenario::All => vec![
            Scenario::Priority,
            Scenario::Semaphore,
            Scenario::Mailbox,
            Scenario::Messages,
            Scenario::Handoff,
        ],
        one => vec![one],
    };

    for scenario in scenarios {
        println!("=== {scenario:?} ===");
        let rt = Runtime::with_config(config.clone());
        match scenario {
            Scenario::Priority => priority(&rt)?,
            Scenario::Semaphore => semaphore(&rt)?,
            Scenario::Mailbox => mailbox(&rt)?,
            Scenario::Messages => messages(&rt)?,
            Scenario::Handoff => handoff(&rt)?,
            Scenario::All => unreachable!("expanded above"),
        }
        if let Some(stats) = rt.stats() {
            println!("stats: {stats:?}");
        }
        rt.shutdown();
    }
    Ok(())
}

/// Run the other threads until only the bootstrap thread is left
fn drain(rt: &Runtime) {
    while rt.thread_count() > 1 {
        rt.yield_now();
    }
}

fn priority(rt: &Runtime) -> Result<()> {
    let threads = [(1, Priority::High), (2, Priority::Low), (3, Priority::High)];
    for (id, priority) in threads {
        let worker = rt.clone();
        rt.create(id, priority, move |id| {
            for pass in 0..3 {
                println!("thread {id} ({priority}) pass {pass}");
                worker.yield_now();
            }
        });
    }
    drain(rt);
    ensure!(rt.thread_count() == 1, "threads left behind");
    Ok(())
}

fn semaphore(rt: &Runtime) -> Result<()> {
    let items = Rc::new(Semaphore::new(rt, 0));
    let slots = Rc::new(Semaphore::new(rt, 2));
    let buffer = Rc::new(RefCell::new(VecDeque::new()));

    {
        let (items, slots, buffer) = (items.clone(), slots.clone(), buffer.clone());
        rt.create(1, Priority::Low, move |id| {
            for n in 0..5 {
                slots.wait();
                buffer.borrow_mut().push_back(n);
                println!("thread {id} produced {n}");
                items.signal();
            }
        });
    }
    {
        let (items, slots, buffer) = (items.clone(), slots.clone(), buffer.clone());
        rt.create(2, Priority::Low, move |id| {
            for _ in 0..5 {
                items.wait();
                let n = buffer.borrow_mut().pop_front();
                println!("thread {id} consumed {n:?}");
                slots.signal();
            }
        });
    }

    drain(rt);
    ensure!(buffer.borrow().is_empty(), "items left in buffer");
    Ok(())
}

fn mailbox(rt: &Runtime) -> Result<()> {
    const MESSAGES: [&str; 2] = ["Message 1", "Another Message"];
    let mb = Rc::new(Mailbox::new(rt));

    for id in [1, 2] {
        let (worker, mb) = (rt.clone(), mb.clone());
        rt.create(id, Priority::Low, move |id| {
            for text in MESSAGES {
                let message = format!("{text} - tid {id}");
                println!("Created MSG: ({id}): [{message}] [length={}]", message.len());
                mb.deposit(message.as_bytes());
            }
            worker.terminate();
        });
    }
    {
        let (worker, mb) = (rt.clone(), mb.clone());
        rt.create(3, Priority::Low, move |_| {
            let mut buf = [0u8; 1024];
            for _ in 0..4 {
                let len = mb.withdraw_into(&mut buf);
                println!(
                    "MBox Message: [{}], length={len}",
                    String::from_utf8_lossy(&buf[..len])
                );
            }
            worker.terminate();
        });
    }
    rt.yield_now();
    drain(rt);

    // Everything was consumed, so this reports the empty mailbox
    let leftover = mb.withdraw();
    println!("withdraw from empty mailbox: {leftover:?}");
    Ok(())
}

fn messages(rt: &Runtime) -> Result<()> {
    for id in 1..=3 {
        let worker = rt.clone();
        rt.create(id, Priority::High, move |id| {
            worker.send(ThreadId::MAIN, format!("hello from {id}").as_bytes());
        });
    }
    let worker = rt.clone();
    rt.create(4, Priority::High, move |_| {
        // Nobody has id 99: silently dropped
        worker.send(99, b"lost");
    });
    drain(rt);
    ensure!(rt.pending() == 3, "expected three queued messages");

    let (sender, data) = rt.receive(2).context("runtime shut down")?;
    println!("filtered receive: {} from {sender}", String::from_utf8(data)?);
    while rt.pending() > 0 {
        let (sender, data) = rt.receive(ThreadId::WILDCARD).context("runtime shut down")?;
        println!("receive: {} from {sender}", String::from_utf8(data)?);
    }
    Ok(())
}

fn handoff(rt: &Runtime) -> Result<()> {
    let worker = rt.clone();
    rt.create(1, Priority::High, move |id| {
        println!("thread {id} sending");
        worker.block_send(ThreadId::MAIN, b"synchronous");
        println!("thread {id} resumed after hand-off");
    });

    rt.yield_now();
    let (sender, data) = rt.block_receive(1).context("runtime shut down")?;
    println!("main received {:?} from {sender}", String::from_utf8_lossy(&data));
    drain(rt);
    Ok(())
}

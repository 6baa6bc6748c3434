//! Thread-per-node scheduler for decoder chains
//!
//! Spawns a dedicated thread for each node, calls `work()` in a loop until the
//! node reports end-of-stream or fails, then calls `finish()` so downstream
//! nodes see end-of-stream in turn. A stacked chain therefore shuts down from
//! the source outwards without any external signal.

use super::errors::WorkError;
use super::node::ProcessNode;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver as StdReceiver, Sender as StdSender, channel};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Outcome of one node thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub name: String,
    pub items: usize,
    /// Set if the node stopped for any reason other than end-of-stream
    pub error: Option<String>,
}

impl NodeReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Runtime scheduler that executes a chain of nodes
pub struct Scheduler {
    threads: Vec<(String, JoinHandle<NodeReport>)>,
    completion_tx: StdSender<String>,
    completion_rx: StdReceiver<String>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (completion_tx, completion_rx) = channel();
        Self {
            threads: Vec::new(),
            completion_tx,
            completion_rx,
        }
    }

    /// Start a node in its own thread
    pub fn start_process(&mut self, mut node: Box<dyn ProcessNode>) {
        let completion_tx = self.completion_tx.clone();
        let name = node.name().to_string();
        let thread_name = name.clone();

        debug!("Starting process node: {}", name);

        let handle = thread::spawn(move || {
            let mut items = 0usize;
            let mut failure = None;

            loop {
                if node.should_stop() {
                    break;
                }
                match node.work() {
                    Ok(n) => items += n,
                    Err(WorkError::EndOfStream) => break,
                    Err(e) => {
                        error!("[{}] Work error: {}", thread_name, e);
                        failure = Some(e.to_string());
                        break;
                    }
                }
            }

            node.finish();
            info!("[{}] Shutdown. Processed {} items.", thread_name, items);
            drop(node);

            // Notify scheduler that this thread is about to complete
            let _ = completion_tx.send(thread_name.clone());
            NodeReport {
                name: thread_name,
                items,
                error: failure,
            }
        });

        self.threads.push((name, handle));
    }

    /// Wait for all node threads to complete, in completion order
    pub fn wait(self) -> Vec<NodeReport> {
        // Drop the main completion sender so the channel closes when all threads complete
        drop(self.completion_tx);

        let total_threads = self.threads.len();
        let mut reports = Vec::with_capacity(total_threads);

        info!("Waiting for {} threads to complete...", total_threads);

        let mut threads_by_name: HashMap<String, JoinHandle<NodeReport>> =
            self.threads.into_iter().collect();

        while reports.len() < total_threads {
            let Ok(thread_name) = self.completion_rx.recv() else {
                break;
            };
            let Some(handle) = threads_by_name.remove(&thread_name) else {
                continue;
            };
            match handle.join() {
                Ok(report) => {
                    info!(
                        "[{}] Thread completed ({}/{})",
                        thread_name,
                        reports.len() + 1,
                        total_threads
                    );
                    reports.push(report);
                }
                Err(e) => {
                    error!("[{}] Thread panicked: {:?}", thread_name, e);
                    reports.push(NodeReport {
                        name: thread_name,
                        items: 0,
                        error: Some("panicked".to_string()),
                    });
                }
            }
        }

        // Threads that panicked never notify
        for (thread_name, handle) in threads_by_name {
            let report = handle.join().unwrap_or_else(|e| {
                error!("[{}] Thread panicked: {:?}", thread_name, e);
                NodeReport {
                    name: thread_name,
                    items: 0,
                    error: Some("panicked".to_string()),
                }
            });
            reports.push(report);
        }

        info!("All {} threads completed", total_threads);
        reports
    }

    /// Get the number of started threads
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::errors::WorkResult;
    use crate::runtime::receiver::Receiver;
    use crate::runtime::sender::Sender;
    use crossbeam_channel::unbounded;
    use std::sync::{Arc, Mutex};

    struct TestSource {
        count: u32,
        max: u32,
        output: Sender<u32>,
    }

    impl ProcessNode for TestSource {
        fn name(&self) -> &str {
            "test_source"
        }

        fn work(&mut self) -> WorkResult<usize> {
            if self.count >= self.max {
                return Err(WorkError::EndOfStream);
            }
            self.output.send(self.count);
            self.count += 1;
            Ok(1)
        }

        fn finish(&mut self) {
            self.output.close();
        }
    }

    struct TestSink {
        input: Receiver<u32>,
        received: Arc<Mutex<Vec<u32>>>,
    }

    impl ProcessNode for TestSink {
        fn name(&self) -> &str {
            "test_sink"
        }

        fn work(&mut self) -> WorkResult<usize> {
            let value = self.input.recv()?;
            self.received.lock().unwrap().push(value);
            Ok(1)
        }
    }

    struct Failing;

    impl ProcessNode for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn work(&mut self) -> WorkResult<usize> {
            Err(WorkError::Contract("broken".into()))
        }
    }

    #[test]
    fn test_scheduler_chain_runs_to_end_of_stream() {
        let mut scheduler = Scheduler::new();
        let (tx, rx) = unbounded();
        let mut output = Sender::new();
        output.attach(tx);

        let received = Arc::new(Mutex::new(Vec::new()));
        scheduler.start_process(Box::new(TestSource {
            count: 0,
            max: 5,
            output,
        }));
        scheduler.start_process(Box::new(TestSink {
            input: Receiver::new(rx),
            received: Arc::clone(&received),
        }));
        assert_eq!(scheduler.num_threads(), 2);

        let reports = scheduler.wait();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(NodeReport::is_ok));
        assert_eq!(*received.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_scheduler_reports_failures() {
        let mut scheduler = Scheduler::new();
        scheduler.start_process(Box::new(Failing));
        let reports = scheduler.wait();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].error.as_deref().unwrap().contains("broken"));
    }
}

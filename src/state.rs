use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};

/// Shared value with change notification. One writer (the pipeline)
/// mutates it, any number of readers take snapshots or subscribe to
/// every published value.
pub struct Observable<T: Clone> {
    value: Arc<RwLock<T>>,
    subscribers: Arc<Mutex<Vec<Sender<T>>>>,
}

impl<T: Clone> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<T: Clone> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get(&self) -> T {
        match self.value.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Reads through a closure without cloning the whole value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.value.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    /// Mutates the value and publishes the result to every subscriber.
    /// Publishing happens under the write lock, so subscribers receive
    /// snapshots in the order the writes were applied.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = match self.value.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = f(&mut guard);
        self.publish(guard.clone());
        result
    }

    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    fn publish(&self, snapshot: T) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn subscribers_see_every_update_in_order() {
        let cell = Observable::new(0u32);
        let rx = cell.subscribe();
        let writer = cell.clone();

        thread::spawn(move || {
            for _ in 0..5 {
                writer.update(|value| *value += 1);
            }
        })
        .join()
        .unwrap();

        let seen: Vec<u32> = rx.try_iter().collect();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(cell.get(), 5);
    }

    #[test]
    fn concurrent_writers_publish_in_write_order() {
        let cell = Observable::new(0u32);
        let rx = cell.subscribe();

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let writer = cell.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        writer.update(|value| *value += 1);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let seen: Vec<u32> = rx.try_iter().collect();
        assert_eq!(seen, (1..=1000).collect::<Vec<u32>>());
    }

    #[test]
    fn dropped_subscribers_are_forgotten() {
        let cell = Observable::new(String::new());
        drop(cell.subscribe());
        cell.update(|value| value.push('x'));
        assert_eq!(cell.subscribers.lock().unwrap().len(), 0);
    }
}

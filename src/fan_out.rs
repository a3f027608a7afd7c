use std::any::Any;
use std::thread;

use crate::error::BridgeError;

pub const DEFAULT_WORKERS: usize = 8;

/// Runs `task` for every item on scoped threads, at most `workers` at a
/// time. Results keep the input order and the first error wins.
pub fn fan_out<T, R, F>(items: Vec<T>, workers: usize, task: F) -> Result<Vec<R>, BridgeError>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R, BridgeError> + Sync,
{
    if items.len() <= 1 || workers <= 1 {
        return items.into_iter().map(&task).collect();
    }

    let mut results = Vec::with_capacity(items.len());
    let mut pending = items.into_iter();
    loop {
        let batch: Vec<T> = pending.by_ref().take(workers).collect();
        if batch.is_empty() {
            break;
        }
        let task = &task;
        let batch_results = thread::scope(|scope| {
            let handles: Vec<_> = batch
                .into_iter()
                .map(|item| scope.spawn(move || task(item)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|payload| BridgeError::TaskPanicked(panic_message(payload)))
                        .and_then(|result| result)
                })
                .collect::<Vec<_>>()
        });
        for result in batch_results {
            results.push(result?);
        }
    }
    Ok(results)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_input_order() {
        let doubled = fan_out((0..20).collect(), 4, |n: u64| Ok(n * 2)).unwrap();
        assert_eq!(doubled, (0..20).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn first_error_is_returned() {
        let result = fan_out(vec![1, 2, 3], 3, |n: u32| {
            if n == 2 {
                Err(BridgeError::NotFound(n.to_string()))
            } else {
                Ok(n)
            }
        });
        assert!(matches!(result, Err(BridgeError::NotFound(id)) if id == "2"));
    }

    #[test]
    fn panics_become_errors() {
        let result = fan_out(vec![1, 2], 2, |n: u32| {
            if n == 2 {
                panic!("boom");
            }
            Ok(n)
        });
        assert!(matches!(result, Err(BridgeError::TaskPanicked(message)) if message == "boom"));
    }
}

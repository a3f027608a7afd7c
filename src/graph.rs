use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde_json::Value;

pub type Closure = BTreeMap<String, BTreeSet<String>>;

/// Builds, for every node reachable from `start` along `edges`, the set of
/// nodes lying on some path from the start list to it (itself included).
///
/// With `edges` pointing parent to child and `start` holding the roots this is
/// the ancestor-or-self closure; walking from the leaves along child to parent
/// edges yields descendant-or-self sets instead.
pub fn build_forest<S>(start: &[S], edges: &HashMap<String, Vec<String>>) -> Closure
where
    S: AsRef<str>,
{
    let mut reachable: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = start.iter().map(|s| s.as_ref().to_string()).collect();
    while let Some(node) = queue.pop_front() {
        if !reachable.insert(node.clone()) {
            continue;
        }
        for next in edges.get(&node).into_iter().flatten() {
            if !reachable.contains(next) {
                queue.push_back(next.clone());
            }
        }
    }

    let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut pending: HashMap<&str, usize> = reachable.iter().map(|n| (n.as_str(), 0)).collect();
    for node in &reachable {
        for next in edges.get(node).into_iter().flatten() {
            predecessors
                .entry(next.as_str())
                .or_default()
                .push(node.as_str());
            if let Some(count) = pending.get_mut(next.as_str()) {
                *count += 1;
            }
        }
    }

    let mut closure: Closure = BTreeMap::new();
    let mut ready: VecDeque<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(node, _)| *node)
        .collect();
    while let Some(node) = ready.pop_front() {
        let mut set = BTreeSet::from([node.to_string()]);
        for pred in predecessors.get(node).into_iter().flatten() {
            if let Some(pred_set) = closure.get(*pred) {
                set.extend(pred_set.iter().cloned());
            }
        }
        closure.insert(node.to_string(), set);
        for next in edges.get(node).into_iter().flatten() {
            if let Some(count) = pending.get_mut(next.as_str()) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(next.as_str());
                }
            }
        }
    }

    // nodes on a cycle never become ready; walk their predecessors directly
    let leftover: Vec<&String> = reachable
        .iter()
        .filter(|node| !closure.contains_key(*node))
        .collect();
    for node in leftover {
        let mut set = BTreeSet::new();
        let mut stack = vec![node.as_str()];
        while let Some(current) = stack.pop() {
            if !set.insert(current.to_string()) {
                continue;
            }
            stack.extend(predecessors.get(current).into_iter().flatten().copied());
        }
        closure.insert(node.clone(), set);
    }
    closure
}

/// Set union over object arrays keyed by `key`, first occurrence wins.
pub fn union_by_key(arrays: &[Vec<Value>], key: &str) -> Vec<Value> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for item in arrays.iter().flatten() {
        let id = key_of(item, key);
        if seen.insert(id) {
            out.push(item.clone());
        }
    }
    out
}

/// Items of the first array whose key is present in every other array.
pub fn intersect_by_key(arrays: &[Vec<Value>], key: &str) -> Vec<Value> {
    let Some((first, rest)) = arrays.split_first() else {
        return Vec::new();
    };
    let rest_keys: Vec<BTreeSet<String>> = rest
        .iter()
        .map(|items| items.iter().map(|item| key_of(item, key)).collect())
        .collect();
    let mut seen = BTreeSet::new();
    first
        .iter()
        .filter(|item| {
            let id = key_of(item, key);
            rest_keys.iter().all(|keys| keys.contains(&id)) && seen.insert(id)
        })
        .cloned()
        .collect()
}

fn key_of(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(value)) => value.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edges(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(from, to)| {
                (
                    from.to_string(),
                    to.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ancestor_closure_of_forest() {
        let edges = edges(&[("a", &["b", "c"]), ("b", &["d"]), ("c", &["d", "e"]), ("e", &["f"])]);
        let closure = build_forest(&["a"], &edges);
        assert_eq!(closure["d"], set(&["a", "b", "c", "d"]));
        assert_eq!(closure["f"], set(&["a", "c", "e", "f"]));
        assert_eq!(closure["a"], set(&["a"]));
    }

    #[test]
    fn paths_from_several_starts() {
        let edges = edges(&[
            ("a", &["b", "c"]),
            ("b", &["d"]),
            ("c", &["d"]),
            ("q", &["p"]),
            ("p", &["c"]),
            ("z", &["b", "p"]),
        ]);
        let closure = build_forest(&["a", "q", "z"], &edges);
        assert_eq!(closure["d"], set(&["a", "b", "c", "d", "p", "q", "z"]));
        assert_eq!(closure["c"], set(&["a", "c", "p", "q", "z"]));
        assert_eq!(closure["p"], set(&["p", "q", "z"]));
        assert_eq!(closure["b"], set(&["a", "b", "z"]));
    }

    #[test]
    fn cycles_terminate() {
        let edges = edges(&[("a", &["b"]), ("b", &["c"]), ("c", &["b"])]);
        let closure = build_forest(&["a"], &edges);
        assert_eq!(closure["c"], set(&["a", "b", "c"]));
    }

    #[test]
    fn union_and_intersection_by_key() {
        let left = vec![json!({"pid": "1"}), json!({"pid": "2"})];
        let right = vec![json!({"pid": "2"}), json!({"pid": "3"})];
        let arrays = [left, right];
        let union = union_by_key(&arrays, "pid");
        assert_eq!(union.len(), 3);
        let both = intersect_by_key(&arrays, "pid");
        assert_eq!(both, vec![json!({"pid": "2"})]);
    }
}

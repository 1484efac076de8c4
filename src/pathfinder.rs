//! Breadth-first shortest path over the warp graph.
//!
//! BFS gives shortest-hop paths on an unweighted graph, `from == to`
//! short-circuits to a zero-hop route without touching the graph at all,
//! and a sector named in `avoid` blocks traversal through it -- including
//! as the `from` or `to` sector itself.

use crate::error::{codes, Refusal};
use crate::store::Store;
use pathfinding::directed::bfs::bfs;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub from: i64,
    pub to: i64,
    pub path: Vec<i64>,
    pub hops: usize,
}

/// Load the full `sector_warps` edge set once per call rather than caching
/// it, since the warp graph can change under gameplay (new genesis
/// torpedoes, collapsed warps) between calls.
fn load_adjacency(store: &Store) -> Result<HashMap<i64, Vec<i64>>, Refusal> {
    let mut stmt = store
        .prepare("SELECT from_sector, to_sector FROM sector_warps")
        .map_err(|e| Refusal::new(codes::ERR_DB, e.to_string()))?;
    let mut adjacency: HashMap<i64, Vec<i64>> = HashMap::new();
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
        .map_err(|e| Refusal::new(codes::ERR_DB, e.to_string()))?;
    for row in rows {
        let (from, to) = row.map_err(|e| Refusal::new(codes::ERR_DB, e.to_string()))?;
        adjacency.entry(from).or_default().push(to);
    }
    Ok(adjacency)
}

/// Find the shortest hop path from `from` to `to`, refusing to route through
/// any sector in `avoid`.
pub fn find_route(
    store: &Store,
    from: i64,
    to: i64,
    avoid: &HashSet<i64>,
) -> Result<Route, Refusal> {
    if avoid.contains(&from) || avoid.contains(&to) {
        return Err(Refusal::new(codes::REF_SAFE_ZONE_ONLY, "path not found"));
    }

    if from == to {
        return Ok(Route {
            from,
            to,
            path: vec![from],
            hops: 0,
        });
    }

    let adjacency = load_adjacency(store)?;

    let path = bfs(
        &from,
        |sector| {
            adjacency
                .get(sector)
                .map(|edges| edges.as_slice())
                .unwrap_or(&[])
                .iter()
                .copied()
                .filter(|v| !avoid.contains(v))
                .collect::<Vec<i64>>()
        },
        |sector| *sector == to,
    )
    .ok_or_else(|| Refusal::new(codes::REF_SAFE_ZONE_ONLY, "path not found"))?;

    Ok(Route {
        from,
        to,
        hops: path.len() - 1,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::ensure_schema;

    fn test_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        ensure_schema(&store).unwrap();
        store
    }

    #[test]
    fn from_equals_to_is_zero_hops() {
        let store = test_store();
        let route = find_route(&store, 3, 3, &HashSet::new()).unwrap();
        assert_eq!(route.hops, 0);
        assert_eq!(route.path, vec![3]);
    }

    #[test]
    fn shortcut_edges_give_a_four_hop_route() {
        let store = test_store();
        let route = find_route(&store, 9, 6, &HashSet::new()).unwrap();
        assert!(route.hops <= 4, "expected <=4 hops, got {}", route.hops);
        assert_eq!(*route.path.first().unwrap(), 9);
        assert_eq!(*route.path.last().unwrap(), 6);
    }

    #[test]
    fn avoided_destination_is_refused() {
        let store = test_store();
        let mut avoid = HashSet::new();
        avoid.insert(6i64);
        let err = find_route(&store, 9, 6, &avoid).unwrap_err();
        assert_eq!(err.code, codes::REF_SAFE_ZONE_ONLY);
    }

    #[test]
    fn unreachable_sector_is_refused() {
        let store = test_store();
        store
            .execute("INSERT INTO sectors (id, name, safe_zone) VALUES (999, 'Isolated', 0)", [])
            .unwrap();
        let err = find_route(&store, 1, 999, &HashSet::new()).unwrap_err();
        assert_eq!(err.code, codes::REF_SAFE_ZONE_ONLY);
    }
}

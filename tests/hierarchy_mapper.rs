use hashbrown::HashSet;
use proptest::{prelude::*, sample::Index};
use row_window::{hierarchy::HierarchyMapper, HierarchyError};
use std::ops::Range;

mod common;

fn snapshot(mapper: &HierarchyMapper<&'static str>) -> Vec<(Option<&'static str>, Range<usize>)> {
	let mut nodes: Vec<_> = Some(None)
		.into_iter()
		.chain(mapper.expanded_keys().map(Some))
		.map(|key| (key.copied(), mapper.node_for_key(key).unwrap().range()))
		.collect();
	nodes.sort_by_key(|(_, range)| (range.start, range.end));
	nodes
}

#[test]
fn expand_and_collapse_shift_ranges() {
	common::init_tracing();
	let mut mapper = HierarchyMapper::new();

	mapper.reset(3);
	assert_eq!(mapper.root().start_index(), 0);
	assert_eq!(mapper.root().end_index(), 2);

	assert_eq!(mapper.expand("1", 1, 3), Ok(3));
	assert_eq!(mapper.root().end_index(), 5);
	let one = mapper.node_for_key(Some(&"1")).unwrap();
	assert_eq!((one.start_index(), one.end_index()), (2, 4));
	assert_eq!(mapper.tree_size(), 6);

	assert_eq!(mapper.expand("0", 0, 3), Ok(3));
	assert_eq!(mapper.root().end_index(), 8);
	let zero = mapper.node_for_key(Some(&"0")).unwrap();
	assert_eq!((zero.start_index(), zero.end_index()), (1, 3));
	let one = mapper.node_for_key(Some(&"1")).unwrap();
	assert_eq!((one.start_index(), one.end_index()), (5, 7));
	assert_eq!(mapper.tree_size(), 9);

	assert_eq!(mapper.collapse(&"0", 0), Ok(3));
	assert_eq!(mapper.root().end_index(), 5);
	let one = mapper.node_for_key(Some(&"1")).unwrap();
	assert_eq!((one.start_index(), one.end_index()), (2, 4));
	assert!(mapper.node_for_key(Some(&"0")).is_none());
	assert_eq!(mapper.tree_size(), 6);
	mapper.validate().unwrap();
}

#[test]
fn expand_then_collapse_restores_nested_tree() {
	let mut mapper = HierarchyMapper::new();
	mapper.reset(4);
	mapper.expand("a", 1, 3).unwrap();
	mapper.expand("a.1", 3, 2).unwrap();
	mapper.expand("d", 8, 2).unwrap();

	let before = snapshot(&mapper);
	let size_before = mapper.tree_size();

	// Row 4 is "a.1.0", two levels down.
	mapper.expand("a.1.0", 4, 5).unwrap();
	assert_eq!(mapper.tree_size(), size_before + 5);
	assert_eq!(mapper.node_for_key(Some(&"a")).unwrap().size(), 10);
	assert_eq!(mapper.node_for_key(Some(&"d")).unwrap().start_index(), 14);
	mapper.validate().unwrap();

	assert_eq!(mapper.collapse(&"a.1.0", 4), Ok(5));
	assert_eq!(snapshot(&mapper), before);
	assert_eq!(mapper.tree_size(), size_before);
	mapper.validate().unwrap();
}

#[test]
fn collapsing_an_ancestor_forgets_descendants() {
	let mut mapper = HierarchyMapper::new();
	mapper.reset(2);
	mapper.expand("a", 0, 2).unwrap();
	mapper.expand("a.0", 1, 2).unwrap();
	mapper.expand("a.0.1", 3, 1).unwrap();
	assert_eq!(mapper.tree_size(), 7);

	assert_eq!(mapper.collapse(&"a", 0), Ok(5));
	for key in ["a", "a.0", "a.0.1"] {
		assert!(mapper.node_for_key(Some(&key)).is_none(), "{} is still expanded", key);
		assert!(mapper.is_collapsed(&key));
	}
	assert_eq!(mapper.expanded_count(), 0);
	assert_eq!(mapper.tree_size(), 2);
	mapper.validate().unwrap();
}

#[test]
fn rejected_operations_change_nothing() {
	let mut mapper = HierarchyMapper::new();
	mapper.reset(3);
	mapper.expand("0", 0, 2).unwrap();
	let before = snapshot(&mapper);

	assert_eq!(mapper.expand("0", 0, 2), Err(HierarchyError::AlreadyExpanded { index: 0 }));
	assert_eq!(mapper.expand("x", 5, 2), Err(HierarchyError::IndexOutOfBounds { index: 5, tree_size: 5 }));
	assert_eq!(mapper.expand("x", 1, 0), Err(HierarchyError::EmptyExpansion { index: 1 }));
	assert_eq!(mapper.collapse(&"0", 2), Err(HierarchyError::IndexMismatch { index: 2, start_index: 1 }));
	assert_eq!(mapper.collapse(&"0", 9), Err(HierarchyError::IndexOutOfBounds { index: 9, tree_size: 5 }));
	assert_eq!(mapper.collapse(&"2", 4), Ok(0));

	assert_eq!(snapshot(&mapper), before);
	mapper.validate().unwrap();
}

#[test]
fn parent_index_and_depth() {
	let mut mapper = HierarchyMapper::new();
	mapper.reset(2);
	mapper.expand("a", 0, 2).unwrap();
	mapper.expand("a.1", 2, 2).unwrap();
	// a, a.0, a.1, a.1.0, a.1.1, b
	let parents: Vec<_> = (0..6).map(|row| mapper.parent_index(row).unwrap()).collect();
	assert_eq!(parents, vec![None, Some(0), Some(0), Some(2), Some(2), None]);
	let depths: Vec<_> = (0..6).map(|row| mapper.depth_of(row).unwrap()).collect();
	assert_eq!(depths, vec![0, 1, 1, 2, 2, 0]);
	assert!(mapper.parent_index(6).is_err());
}

#[test]
fn level_queries_cover_a_range_in_flat_order() {
	let mut mapper = HierarchyMapper::new();
	mapper.reset(3);
	mapper.expand("0", 0, 3).unwrap();
	mapper.expand("0.1", 2, 2).unwrap();
	// 0, 0.0, 0.1, 0.1.0, 0.1.1, 0.2, 1, 2

	let queries = mapper.split_range_to_level_queries(1..7);
	let summary: Vec<_> = queries.iter().map(|query| (query.parent_key, query.first_child, query.size, query.depth)).collect();
	assert_eq!(summary, vec![(None, 1, 1, 0), (Some("0"), 0, 3, 1), (Some("0.1"), 0, 2, 2)]);

	let mut rows = vec![None; 6];
	for query in &queries {
		let children: Vec<String> = (query.first_child..query.first_child + query.size)
			.map(|child| match query.parent_key {
				Some(parent) => format!("{}.{}", parent, child),
				None => child.to_string(),
			})
			.collect();
		let placed = mapper.reorder_level_query_results(query, children, |flat_index, row| rows[flat_index - 1] = Some(row));
		assert_eq!(placed, query.size);
	}
	let rows: Vec<String> = rows.into_iter().map(Option::unwrap).collect();
	assert_eq!(rows, vec!["0.0", "0.1", "0.1.0", "0.1.1", "0.2", "1"]);
}

// ── Model-based fuzzing ─────────────────────────────────────────────────

const ROOT_SIZE: usize = 4;
const MAX_DEPTH: usize = 3;

fn child_count(path: &str) -> usize {
	1 + path.bytes().map(usize::from).sum::<usize>() % 3
}

fn children(parent: Option<&str>) -> Vec<String> {
	match parent {
		None => (0..ROOT_SIZE).map(|child| child.to_string()).collect(),
		Some(parent) => (0..child_count(parent)).map(|child| format!("{}.{}", parent, child)).collect(),
	}
}

fn depth(path: &str) -> usize {
	path.matches('.').count()
}

fn parent(path: &str) -> Option<&str> {
	path.rsplit_once('.').map(|(parent, _)| parent)
}

fn flatten(expanded: &HashSet<String>) -> Vec<String> {
	fn walk(parent: Option<&str>, expanded: &HashSet<String>, rows: &mut Vec<String>) {
		for child in children(parent) {
			rows.push(child.clone());
			if expanded.contains(&child) {
				walk(Some(&child), expanded, rows);
			}
		}
	}
	let mut rows = Vec::new();
	walk(None, expanded, &mut rows);
	rows
}

fn check_against_model(mapper: &HierarchyMapper<String>, expanded: &HashSet<String>) -> Result<(), TestCaseError> {
	if let Err(violation) = mapper.validate() {
		return Err(TestCaseError::fail(violation.to_string()));
	}
	let rows = flatten(expanded);
	prop_assert_eq!(mapper.tree_size(), rows.len());
	prop_assert_eq!(mapper.expanded_count(), expanded.len());

	for (row, path) in rows.iter().enumerate() {
		let expected_parent = parent(path).map(|parent| rows.iter().position(|row| row == parent).unwrap());
		prop_assert_eq!(mapper.parent_index(row).unwrap(), expected_parent, "parent of {}", path);
		prop_assert_eq!(mapper.depth_of(row).unwrap(), depth(path), "depth of {}", path);

		if expanded.contains(path) {
			let prefix = format!("{}.", path);
			let descendants = rows[row + 1..].iter().take_while(|row| row.starts_with(&prefix)).count();
			let node = mapper.node_for_key(Some(path)).unwrap();
			prop_assert_eq!(node.range(), row + 1..row + 1 + descendants, "range of {}", path);
		}
	}
	Ok(())
}

proptest! {
	#[test]
	fn random_toggles_match_brute_force_flattening(toggles in prop::collection::vec(any::<Index>(), 1..40)) {
		let mut mapper = HierarchyMapper::new();
		mapper.reset(ROOT_SIZE);
		let mut expanded = HashSet::new();

		for toggle in toggles {
			let rows = flatten(&expanded);
			let row = toggle.index(rows.len());
			let path = rows[row].clone();

			if expanded.contains(&path) {
				let prefix = format!("{}.", path);
				let descendants = rows[row + 1..].iter().take_while(|row| row.starts_with(&prefix)).count();
				prop_assert_eq!(mapper.collapse(&path, row), Ok(descendants));
				expanded.retain(|key: &String| key != &path && !key.starts_with(&prefix));
			} else if depth(&path) < MAX_DEPTH {
				prop_assert_eq!(mapper.expand(path.clone(), row, child_count(&path)), Ok(child_count(&path)));
				expanded.insert(path);
			}
			check_against_model(&mapper, &expanded)?;
		}
	}

	#[test]
	fn level_queries_reproduce_any_range(
		toggles in prop::collection::vec(any::<Index>(), 0..20),
		from in any::<Index>(),
		to in any::<Index>(),
	) {
		let mut mapper = HierarchyMapper::new();
		mapper.reset(ROOT_SIZE);
		let mut expanded = HashSet::new();
		for toggle in toggles {
			let rows = flatten(&expanded);
			let row = toggle.index(rows.len());
			let path = rows[row].clone();
			if !expanded.contains(&path) && depth(&path) < MAX_DEPTH {
				mapper.expand(path.clone(), row, child_count(&path)).unwrap();
				expanded.insert(path);
			}
		}

		let rows = flatten(&expanded);
		let (a, b) = (from.index(rows.len() + 1), to.index(rows.len() + 1));
		let range = a.min(b)..a.max(b);

		let mut placed_rows = vec![None; range.len()];
		for query in mapper.split_range_to_level_queries(range.clone()) {
			let siblings = children(query.parent_key.as_deref());
			let fetched = siblings[query.first_child..query.first_child + query.size].to_vec();
			for row in &fetched {
				prop_assert_eq!(depth(row), query.depth);
			}
			let placed = mapper.reorder_level_query_results(&query, fetched, |flat_index, row| placed_rows[flat_index - range.start] = Some(row));
			prop_assert_eq!(placed, query.size);
		}
		let placed_rows: Vec<String> = placed_rows.into_iter().map(Option::unwrap).collect();
		prop_assert_eq!(&placed_rows[..], &rows[range]);
	}
}

//! Asset dependency graph and the selection syntax used to pick assets.
//!
//! Selection clauses are comma separated:
//! - `name` selects one asset
//! - `+name` adds parents, one level per `+`; `*name` adds every ancestor
//! - `name+` adds children; `name++` or `name*` adds everything downstream
//! - `group:<group>` selects a whole group, `*` selects everything

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::assets::AssetKey;
use crate::error::PipelineError;

/// How far a selection clause reaches from its asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reach {
    None,
    Levels(usize),
    All,
}

/// Dependency graph with forward and reverse edges
#[derive(Debug, Clone)]
pub struct AssetGraph {
    /// node -> nodes it depends on
    parents: HashMap<AssetKey, Vec<AssetKey>>,
    /// node -> nodes that depend on it
    children: HashMap<AssetKey, Vec<AssetKey>>,
    nodes: BTreeSet<AssetKey>,
}

impl Default for AssetGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetGraph {
    /// Build the graph from every asset's declared dependencies.
    pub fn new() -> Self {
        Self::from_edges(AssetKey::ALL.iter().map(|k| (*k, k.deps().to_vec())))
    }

    pub fn from_edges(edges: impl IntoIterator<Item = (AssetKey, Vec<AssetKey>)>) -> Self {
        let mut parents: HashMap<AssetKey, Vec<AssetKey>> = HashMap::new();
        let mut children: HashMap<AssetKey, Vec<AssetKey>> = HashMap::new();
        let mut nodes = BTreeSet::new();

        for (node, deps) in edges {
            nodes.insert(node);
            for dep in &deps {
                nodes.insert(*dep);
                children.entry(*dep).or_default().push(node);
            }
            parents.insert(node, deps);
        }

        Self {
            parents,
            children,
            nodes,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = AssetKey> + '_ {
        self.nodes.iter().copied()
    }

    pub fn parents(&self, node: AssetKey) -> &[AssetKey] {
        self.parents.get(&node).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn children(&self, node: AssetKey) -> &[AssetKey] {
        self.children.get(&node).map(Vec::as_slice).unwrap_or_default()
    }

    /// All nodes below `node`, breadth first.
    pub fn downstream(&self, node: AssetKey) -> Vec<AssetKey> {
        self.walk(node, Reach::All, |n| self.children(n))
    }

    /// All nodes above `node`, breadth first.
    pub fn upstream(&self, node: AssetKey) -> Vec<AssetKey> {
        self.walk(node, Reach::All, |n| self.parents(n))
    }

    fn walk<'a>(
        &'a self,
        start: AssetKey,
        reach: Reach,
        next: impl Fn(AssetKey) -> &'a [AssetKey],
    ) -> Vec<AssetKey> {
        let max_depth = match reach {
            Reach::None => return Vec::new(),
            Reach::Levels(n) => n,
            Reach::All => usize::MAX,
        };
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut result = Vec::new();

        for n in next(start) {
            queue.push_back((*n, 1usize));
        }

        while let Some((current, depth)) = queue.pop_front() {
            if depth > max_depth || !visited.insert(current) {
                continue;
            }
            result.push(current);
            for n in next(current) {
                if !visited.contains(n) {
                    queue.push_back((*n, depth + 1));
                }
            }
        }

        result
    }

    /// Kahn's algorithm; ties broken by declaration order so plans are stable.
    pub fn topological_sort(&self) -> Option<Vec<AssetKey>> {
        Some(self.waves(&self.nodes)?.into_iter().flatten().collect())
    }

    /// Group `subset` into execution waves: every node's in-subset parents
    /// sit in an earlier wave. `None` if the subset contains a cycle.
    pub fn waves(&self, subset: &BTreeSet<AssetKey>) -> Option<Vec<Vec<AssetKey>>> {
        let mut in_degree: HashMap<AssetKey, usize> = subset
            .iter()
            .map(|n| {
                let deg = self.parents(*n).iter().filter(|p| subset.contains(p)).count();
                (*n, deg)
            })
            .collect();

        let mut waves = Vec::new();
        let mut placed = 0;
        loop {
            let ready: Vec<AssetKey> = subset
                .iter()
                .copied()
                .filter(|n| in_degree.get(n) == Some(&0))
                .collect();
            if ready.is_empty() {
                break;
            }
            for n in &ready {
                in_degree.remove(n);
                for c in self.children(*n) {
                    if let Some(d) = in_degree.get_mut(c) {
                        *d -= 1;
                    }
                }
            }
            placed += ready.len();
            waves.push(ready);
        }

        (placed == subset.len()).then_some(waves)
    }

    /// Resolve a selection string into the set of assets it names.
    pub fn select(&self, selection: &str) -> Result<BTreeSet<AssetKey>, PipelineError> {
        let invalid = |reason: &str| PipelineError::InvalidSelection {
            selection: selection.to_string(),
            reason: reason.to_string(),
        };

        let mut selected = BTreeSet::new();
        for clause in selection.split(',').map(str::trim) {
            if clause.is_empty() {
                return Err(invalid("empty clause"));
            }
            if clause == "*" {
                selected.extend(self.nodes());
                continue;
            }
            if let Some(group) = clause.strip_prefix("group:") {
                let group = group.trim();
                let members: Vec<AssetKey> =
                    self.nodes().filter(|n| n.group() == group).collect();
                if members.is_empty() {
                    return Err(invalid(&format!("unknown group `{}`", group)));
                }
                selected.extend(members);
                continue;
            }

            let (up, rest) = split_prefix(clause);
            let (name, down) = split_suffix(rest);
            if name.is_empty() {
                return Err(invalid("missing asset name"));
            }
            let key: AssetKey = name.parse()?;

            selected.insert(key);
            selected.extend(self.walk(key, up, |n| self.parents(n)));
            selected.extend(self.walk(key, down, |n| self.children(n)));
        }
        Ok(selected)
    }
}

fn split_prefix(clause: &str) -> (Reach, &str) {
    if let Some(rest) = clause.strip_prefix('*') {
        return (Reach::All, rest);
    }
    let rest = clause.trim_start_matches('+');
    match clause.len() - rest.len() {
        0 => (Reach::None, rest),
        n => (Reach::Levels(n), rest),
    }
}

fn split_suffix(rest: &str) -> (&str, Reach) {
    if let Some(name) = rest.strip_suffix('*') {
        return (name, Reach::All);
    }
    let name = rest.trim_end_matches('+');
    match rest.len() - name.len() {
        0 => (name, Reach::None),
        1 => (name, Reach::Levels(1)),
        _ => (name, Reach::All),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AssetKey::*;

    fn set(keys: &[AssetKey]) -> BTreeSet<AssetKey> {
        keys.iter().copied().collect()
    }

    #[test]
    fn test_downstream_of_source_is_everything_else() {
        let g = AssetGraph::new();
        let down: BTreeSet<_> = g.downstream(LeerDatos).into_iter().collect();
        assert_eq!(
            down,
            set(&[
                DatosProcesados,
                MetricaIncidencia7d,
                MetricaFactorCrec7d,
                ReporteExcelCovid
            ])
        );
        assert!(g.downstream(ReporteExcelCovid).is_empty());
    }

    #[test]
    fn test_upstream_of_report() {
        let g = AssetGraph::new();
        let up: BTreeSet<_> = g.upstream(ReporteExcelCovid).into_iter().collect();
        assert_eq!(
            up,
            set(&[
                LeerDatos,
                DatosProcesados,
                MetricaIncidencia7d,
                MetricaFactorCrec7d
            ])
        );
    }

    #[test]
    fn test_topological_order() {
        let g = AssetGraph::new();
        let order = g.topological_sort().unwrap();
        assert_eq!(order.first(), Some(&LeerDatos));
        assert_eq!(order.last(), Some(&ReporteExcelCovid));
        let pos = |k| order.iter().position(|x| *x == k).unwrap();
        for k in AssetKey::ALL {
            for d in k.deps() {
                assert!(pos(*d) < pos(k));
            }
        }
    }

    #[test]
    fn test_waves_run_metrics_together() {
        let g = AssetGraph::new();
        let all: BTreeSet<_> = g.nodes().collect();
        let waves = g.waves(&all).unwrap();
        assert_eq!(
            waves,
            vec![
                vec![LeerDatos],
                vec![DatosProcesados],
                vec![MetricaIncidencia7d, MetricaFactorCrec7d],
                vec![ReporteExcelCovid],
            ]
        );
    }

    #[test]
    fn test_waves_detect_cycles() {
        let g = AssetGraph::from_edges([
            (LeerDatos, vec![DatosProcesados]),
            (DatosProcesados, vec![LeerDatos]),
        ]);
        assert!(g.topological_sort().is_none());
    }

    #[test]
    fn test_select_double_plus_takes_everything_downstream() {
        let g = AssetGraph::new();
        assert_eq!(g.select("leer_datos++").unwrap(), set(&AssetKey::ALL));
        assert_eq!(g.select("leer_datos*").unwrap(), set(&AssetKey::ALL));
    }

    #[test]
    fn test_select_single_plus_is_one_level() {
        let g = AssetGraph::new();
        assert_eq!(
            g.select("leer_datos+").unwrap(),
            set(&[LeerDatos, DatosProcesados])
        );
        assert_eq!(
            g.select("+metrica_incidencia_7d").unwrap(),
            set(&[DatosProcesados, MetricaIncidencia7d])
        );
        assert_eq!(
            g.select("++metrica_incidencia_7d").unwrap(),
            set(&[LeerDatos, DatosProcesados, MetricaIncidencia7d])
        );
    }

    #[test]
    fn test_select_plain_groups_and_lists() {
        let g = AssetGraph::new();
        assert_eq!(
            g.select("group:metricas").unwrap(),
            set(&[MetricaIncidencia7d, MetricaFactorCrec7d])
        );
        assert_eq!(
            g.select("leer_datos, reporte_excel_covid").unwrap(),
            set(&[LeerDatos, ReporteExcelCovid])
        );
        assert_eq!(g.select("*").unwrap().len(), 5);
    }

    #[test]
    fn test_select_rejects_bad_input() {
        let g = AssetGraph::new();
        assert_eq!(
            g.select("nope++"),
            Err(PipelineError::UnknownAsset("nope".into()))
        );
        assert!(matches!(
            g.select("leer_datos,,"),
            Err(PipelineError::InvalidSelection { .. })
        ));
        assert!(matches!(
            g.select("++"),
            Err(PipelineError::InvalidSelection { .. })
        ));
        assert!(matches!(
            g.select("group:nothing"),
            Err(PipelineError::InvalidSelection { .. })
        ));
    }
}

//! MySQL system variables fuzzed by default.

use super::DbmsTarget;
use crate::action::{ActionSet, ConfigAction, ParamValue, Scope};
use rand::{Rng, RngCore};

const BOTH: &[Scope] = &[Scope::Global, Scope::Session];
const GLOBAL: &[Scope] = &[Scope::Global];
const SESSION: &[Scope] = &[Scope::Session];

const OPTIMIZER_FLAGS: &[&str] = &[
    "index_merge",
    "index_merge_union",
    "index_merge_sort_union",
    "index_merge_intersection",
    "engine_condition_pushdown",
    "index_condition_pushdown",
    "mrr",
    "mrr_cost_based",
    "block_nested_loop",
    "batched_key_access",
    "materialization",
    "semijoin",
    "loosescan",
    "firstmatch",
    "duplicateweedout",
    "subquery_materialization_cost_based",
    "use_index_extensions",
    "condition_fanout_filter",
    "derived_merge",
    "use_invisible_indexes",
    "skip_scan",
    "hash_join",
];

fn flag() -> impl Fn(&mut dyn RngCore) -> ParamValue + Send + Sync + 'static {
    |rng: &mut dyn RngCore| ParamValue::Bool(rng.gen())
}

fn int(lo: i64, hi: i64) -> impl Fn(&mut dyn RngCore) -> ParamValue + Send + Sync + 'static {
    move |rng: &mut dyn RngCore| ParamValue::Int(rng.gen_range(lo..=hi))
}

fn choice(options: &'static [&'static str]) -> impl Fn(&mut dyn RngCore) -> ParamValue + Send + Sync + 'static {
    move |rng: &mut dyn RngCore| {
        ParamValue::Text(options[rng.gen_range(0..options.len())].to_string())
    }
}

fn optimizer_switch() -> impl Fn(&mut dyn RngCore) -> ParamValue + Send + Sync + 'static {
    |rng: &mut dyn RngCore| {
        let name = OPTIMIZER_FLAGS[rng.gen_range(0..OPTIMIZER_FLAGS.len())];
        let state = if rng.gen() { "on" } else { "off" };
        ParamValue::Text(format!("{}={}", name, state))
    }
}

fn var<G>(name: &str, scopes: &[Scope], generator: G) -> Option<ConfigAction>
where
    G: Fn(&mut dyn RngCore) -> ParamValue + Send + Sync + 'static,
{
    ConfigAction::new(name, scopes, generator)
        .map_err(|e| log::warn!("Skipping MySQL variable: {}", e))
        .ok()
}

fn catalogue() -> Vec<ConfigAction> {
    const MAX: i64 = i64::MAX;
    [
        var("big_tables", BOTH, flag()),
        var("completion_type", BOTH, choice(&["NO_CHAIN", "CHAIN", "RELEASE"])),
        var("bulk_insert_buffer_size", BOTH, int(0, MAX)),
        var("concurrent_insert", GLOBAL, choice(&["NEVER", "AUTO", "ALWAYS"])),
        var("cte_max_recursion_depth", BOTH, int(0, 4_294_967_295)),
        var("delay_key_write", GLOBAL, choice(&["ON", "OFF", "ALL"])),
        var("eq_range_index_dive_limit", BOTH, int(0, 4_294_967_295)),
        var("flush", GLOBAL, flag()),
        var("foreign_key_checks", BOTH, flag()),
        var("histogram_generation_max_mem_size", BOTH, int(1_000_000, MAX)),
        var("host_cache_size", GLOBAL, int(0, 65_536)),
        var("internal_tmp_mem_storage_engine", BOTH, choice(&["MEMORY", "TempTable"])),
        var("join_buffer_size", BOTH, int(128, MAX)),
        var("max_heap_table_size", BOTH, int(16_384, MAX)),
        var("max_length_for_sort_data", BOTH, int(4, 8_388_608)),
        var("max_points_in_geometry", BOTH, int(3, 1_048_576)),
        var("max_seeks_for_key", BOTH, int(1, MAX)),
        var("max_sort_length", BOTH, int(4, 8_388_608)),
        var("max_sp_recursion_depth", BOTH, int(0, 255)),
        var("myisam_data_pointer_size", GLOBAL, int(2, 7)),
        var("myisam_max_sort_file_size", GLOBAL, int(0, MAX)),
        var("myisam_sort_buffer_size", BOTH, int(4_096, MAX)),
        var("myisam_stats_method", BOTH, choice(&["nulls_equal", "nulls_unequal", "nulls_ignored"])),
        var("myisam_use_mmap", GLOBAL, flag()),
        var("old_alter_table", BOTH, flag()),
        var("optimizer_prune_level", BOTH, int(0, 1)),
        var("optimizer_search_depth", BOTH, int(0, 62)),
        var("optimizer_switch", BOTH, optimizer_switch()),
        var("parser_max_mem_size", BOTH, int(10_000_000, MAX)),
        var("preload_buffer_size", BOTH, int(1_024, 1_073_741_824)),
        var("query_alloc_block_size", BOTH, int(1_024, 4_294_967_295)),
        var("query_prealloc_size", BOTH, int(8_192, MAX)),
        var("range_alloc_block_size", BOTH, int(4_096, MAX)),
        var("range_optimizer_max_mem_size", BOTH, int(0, MAX)),
        var("rbr_exec_mode", SESSION, choice(&["STRICT", "IDEMPOTENT"])),
        var("read_buffer_size", BOTH, int(8_200, 2_147_479_552)),
        var("read_rnd_buffer_size", BOTH, int(1, 2_147_483_647)),
        var("schema_definition_cache", GLOBAL, int(256, 524_288)),
        var("show_create_table_verbosity", BOTH, flag()),
        var("show_old_temporals", BOTH, flag()),
        var("sql_auto_is_null", BOTH, flag()),
        var("sql_buffer_result", BOTH, flag()),
        var("sql_log_off", BOTH, flag()),
        var("sql_quote_show_create", BOTH, flag()),
        var("tmp_table_size", BOTH, int(1_024, MAX)),
        var("unique_checks", BOTH, flag()),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// MySQL server system variables, set with `SET GLOBAL|SESSION`.
pub struct MySqlTarget {
    actions: ActionSet,
}

impl MySqlTarget {
    pub fn new() -> Self {
        Self {
            actions: ActionSet::new(catalogue()),
        }
    }
}

impl Default for MySqlTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl DbmsTarget for MySqlTarget {
    fn name(&self) -> &str {
        "mysql"
    }

    fn list_actions(&self) -> &ActionSet {
        &self.actions
    }

    fn literal_statement(&self, action: &ConfigAction, literal: &str, scope: Scope) -> String {
        format!("SET {} {} = {}", scope.keyword(), action.name(), literal)
    }

    fn default_statement(&self, action: &ConfigAction, scope: Scope) -> String {
        format!("SET {} {} = DEFAULT", scope.keyword(), action.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Combo;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_catalogue_size() {
        let target = MySqlTarget::new();
        assert_eq!(target.list_actions().len(), 46);
        assert_eq!(Combo::pairwise(target.list_actions().as_slice()).len(), 1035);
    }

    #[test]
    fn test_scopes() {
        let target = MySqlTarget::new();
        let actions = target.list_actions();
        assert_eq!(
            actions.get("flush").unwrap().preferred_scope(),
            Scope::Global
        );
        assert_eq!(
            actions.get("rbr_exec_mode").unwrap().scopes(),
            &[Scope::Session]
        );
        assert_eq!(
            actions.get("sql_log_off").unwrap().preferred_scope(),
            Scope::Session
        );
    }

    #[test]
    fn test_set_statements() {
        let target = MySqlTarget::new();
        let actions = target.list_actions();
        let flush = actions.get("flush").unwrap();
        assert_eq!(
            target.generate_statement(flush, &ParamValue::Bool(true), Scope::Global),
            "SET GLOBAL flush = ON"
        );
        assert_eq!(
            target.default_statement(flush, Scope::Global),
            "SET GLOBAL flush = DEFAULT"
        );
    }

    #[test]
    fn test_apply_and_restore_statements() {
        let target = MySqlTarget::new();
        let actions = target.list_actions();
        let combo = Combo::new([
            actions.get("host_cache_size").unwrap().clone(),
            actions.get("unique_checks").unwrap().clone(),
        ]);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let assignment = combo.roll(&mut rng);

        let apply = target.apply_statements(&assignment);
        assert_eq!(apply.len(), 2);
        assert!(apply[0].starts_with("SET GLOBAL host_cache_size = "));
        assert!(apply[1].starts_with("SET SESSION unique_checks = O"));

        let restore = target.restore_statements(&assignment);
        assert_eq!(
            restore,
            vec![
                "SET GLOBAL host_cache_size = DEFAULT".to_string(),
                "SET SESSION unique_checks = DEFAULT".to_string(),
            ]
        );
    }

    #[test]
    fn test_generated_values_in_range() {
        let target = MySqlTarget::new();
        let depth = target.list_actions().get("optimizer_search_depth").unwrap();
        let switch = target.list_actions().get("optimizer_switch").unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..100 {
            match depth.generate_value(&mut rng) {
                ParamValue::Int(v) => assert!((0..=62).contains(&v)),
                other => panic!("unexpected value {:?}", other),
            }
            match switch.generate_value(&mut rng) {
                ParamValue::Text(s) => assert!(s.ends_with("=on") || s.ends_with("=off")),
                other => panic!("unexpected value {:?}", other),
            }
        }
    }
}

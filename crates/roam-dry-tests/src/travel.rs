// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fixture schema: places, roads and travelers that record where they went.
//!
//! Every place reports `enter:<name>` on entry and `exit:<name>` on exit, so
//! a walk's report log spells out its traversal order.

use roam_core::{
    AbilityDecl, Fields, GraphError, NeighborQuery, RegistryBuilder, Value, Visit,
};

/// Entity archetype with a `name` field.
pub const PLACE: &str = "place";
/// Entity archetype deriving from [`PLACE`].
pub const TOWN: &str = "town";
/// Relationship archetype with `label` and `weight` fields.
pub const ROAD: &str = "road";
/// Walker that fans out over outgoing neighbors everywhere it stands.
pub const ROAMER: &str = "roamer";
/// [`ROAMER`] that disengages at the place named by its `stop_at` field.
pub const STOPPER: &str = "stopper";
/// Walker that travels over relationships rather than straight to
/// neighbors.
pub const EDGE_ROAMER: &str = "edge_roamer";

/// `name` field of the current place, or `""` when it has none.
pub fn place_name(visit: &mut Visit<'_>) -> Result<String, GraphError> {
    let here = visit.here();
    let name = visit.graph().get(here, "name")?;
    Ok(name
        .as_ref()
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_default())
}

fn record_entry(visit: &mut Visit<'_>) -> Result<(), GraphError> {
    let name = place_name(visit)?;
    visit.report(format!("enter:{name}"));
    Ok(())
}

fn record_exit(visit: &mut Visit<'_>) -> Result<(), GraphError> {
    let name = place_name(visit)?;
    visit.report(format!("exit:{name}"));
    Ok(())
}

fn record_crossing(visit: &mut Visit<'_>) -> Result<(), GraphError> {
    let here = visit.here();
    let label = visit.graph().get(here, "label")?;
    let label = label.as_ref().and_then(Value::as_str).unwrap_or_default().to_owned();
    visit.report(format!("cross:{label}"));
    Ok(())
}

fn fan_out(visit: &mut Visit<'_>) -> Result<(), GraphError> {
    let next = visit.neighbors(&NeighborQuery::outgoing())?;
    visit.visit(next);
    Ok(())
}

fn fan_out_edges(visit: &mut Visit<'_>) -> Result<(), GraphError> {
    let next = visit.edges(&NeighborQuery::outgoing())?;
    visit.visit(next);
    Ok(())
}

fn halt_at_mark(visit: &mut Visit<'_>) -> Result<(), GraphError> {
    let Some(mark) = visit
        .fields()
        .get("stop_at")
        .and_then(Value::as_str)
        .filter(|mark| !mark.is_empty())
        .map(str::to_owned)
    else {
        return Ok(());
    };
    if place_name(visit)? == mark {
        visit.disengage();
    }
    Ok(())
}

/// Registry builder carrying the fixture schema.
///
/// Declaration order is part of the fixture: traveler-side `fan_out` runs
/// before `halt_at_mark`, and both run before the place-side recorders.
/// Tests may keep adding archetypes and abilities before calling `build`.
pub fn travel_registry() -> RegistryBuilder {
    RegistryBuilder::new()
        .node(PLACE, None, Fields::new().with("name", ""))
        .node(TOWN, Some(PLACE), Fields::new().with("population", 0_i64))
        .edge(
            ROAD,
            None,
            Fields::new().with("label", "").with("weight", 0_i64),
        )
        .walker(ROAMER, None, Fields::new().with("visited", 0_i64))
        .walker(STOPPER, Some(ROAMER), Fields::new().with("stop_at", ""))
        .walker(EDGE_ROAMER, None, Fields::new())
        .ability(AbilityDecl::entry("fan_out", ROAMER, fan_out))
        .ability(AbilityDecl::entry("halt_at_mark", STOPPER, halt_at_mark))
        .ability(AbilityDecl::entry("fan_out_edges", EDGE_ROAMER, fan_out_edges).matching(&[PLACE]))
        .ability(AbilityDecl::entry("record_entry", PLACE, record_entry))
        .ability(AbilityDecl::exit("record_exit", PLACE, record_exit))
        .ability(AbilityDecl::entry("record_crossing", ROAD, record_crossing))
}

use crate::Result;
use crate::libs::schema::{FieldDef, FieldSchema};

pub const PLAYERS_TABLE: &str = "players";

/// Field holding the ESPN player id, the natural key of the player universe.
pub const PLAYER_KEY_FIELD: &str = "id_espn";

/// Fields of the transformed player-universe export, in load order.
pub fn player_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::integer("id_espn"),
        FieldDef::text("id_fangraphs"),
        FieldDef::integer("id_xmlbam"),
        FieldDef::text("name"),
        FieldDef::text("first_name"),
        FieldDef::text("last_name"),
        FieldDef::text("name_nonascii"),
        FieldDef::text("name_ascii"),
        FieldDef::text("display_name"),
        FieldDef::text("short_name"),
        FieldDef::text("nickname"),
        FieldDef::text("slug_espn"),
        FieldDef::text("slug_fangraphs"),
        FieldDef::text("fangraphs_api_route"),
        FieldDef::text("primary_position"),
        FieldDef::json("eligible_slots"),
        FieldDef::text("pro_team"),
        FieldDef::text("injury_status"),
        FieldDef::text("status"),
        FieldDef::boolean("injured"),
        FieldDef::boolean("active"),
        FieldDef::number("weight"),
        FieldDef::text("display_weight"),
        FieldDef::integer("height"),
        FieldDef::text("display_height"),
        FieldDef::text("bats"),
        FieldDef::text("throws"),
        FieldDef::text("date_of_birth"),
        FieldDef::json("birth_place"),
        FieldDef::integer("debut_year"),
        FieldDef::integer("jersey"),
        FieldDef::text("headshot"),
    ]
}

pub fn player_schema() -> Result<FieldSchema> {
    FieldSchema::new(player_fields())
}

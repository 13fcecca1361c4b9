// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Battlefield demo: a patrol walks past a watchtower's range trigger and
//! the tower reacts to enter/exit events.

use glam::Vec3A;
use overstory_manager::LayerMask;
use overstory_tactics::{Battlefield, BattlefieldConfig, TeamId};

const TOWER_ID: u64 = 1;
const PATROL_ID: u64 = 100;

fn main() {
    env_logger::init();

    let field = Battlefield::new(BattlefieldConfig::default());

    field.register_building(
        TOWER_ID,
        overstory_geom::Aabb::from_center_half_extents(Vec3A::ZERO, Vec3A::new(2.0, 8.0, 2.0)),
        TeamId::Player,
    );
    field.register_unit(PATROL_ID, Vec3A::new(-40.0, 0.0, 0.0), 0.5, TeamId::Enemy);

    let _trigger = field.create_range_trigger(
        TOWER_ID,
        Vec3A::ZERO,
        15.0,
        Some(Box::new(|event| {
            println!(
                "tower spots unit {} at distance {:.1}",
                event.target_id, event.distance
            );
        })),
        Some(Box::new(|event| {
            println!("unit {} slips out of range", event.target_id);
        })),
        LayerMask::UNITS,
        TeamId::None,
    );

    // March the patrol across the map; the trigger fires once on the way in
    // and once on the way out.
    for tick in 0..40 {
        let x = -40.0 + tick as f32 * 2.0;
        field.update_position(PATROL_ID, Vec3A::new(x, 0.0, 0.0));
        field.update(0.1);

        if tick % 10 == 0 {
            let hostiles = field.enemy_units_in_range(Vec3A::ZERO, 25.0, TeamId::Player, true);
            println!("tick {tick:2}: patrol at x = {x:5.1}, {} hostile(s) near", hostiles.len());
        }
    }

    let sees = field.has_line_of_sight(
        Vec3A::new(0.0, 10.0, 0.0),
        Vec3A::new(40.0, 0.5, 0.0),
        TOWER_ID,
        PATROL_ID,
    );
    println!("tower line of sight to patrol endpoint: {sees}");
}

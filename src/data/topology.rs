//! Radial layout of the fleet around the load balancer.
//!
//! ```text
//!              s1
//!              │
//!      s2 ── [hub] ── s0
//!              │
//!              s3
//! ```
//!
//! The hub sits at the viewport center and server `i` of `n` sits at angle
//! `2π·i/n` on a circle of radius `0.3·min(width, height)`. Layout is a pure
//! function of the ordered names and viewport size.

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::time::Instant;

use serde::Serialize;

use super::traffic::TrafficEvent;

/// Identifier of the load balancer node.
pub const HUB_ID: &str = "load-balancer";

/// Fraction of the smaller viewport side used as the ring radius.
const RADIUS_FACTOR: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Hub,
    Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Linear interpolation towards `other`; `t` is clamped to [0, 1].
    pub fn lerp(&self, other: &Point, t: f64) -> Point {
        let t = t.clamp(0.0, 1.0);
        Point {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

/// A positioned node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologyNode {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub role: NodeRole,
}

impl TopologyNode {
    pub fn point(&self) -> Point {
        Point {
            x: self.x,
            y: self.y,
        }
    }
}

/// Result of one layout pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Topology {
    pub hub: TopologyNode,
    pub nodes: Vec<TopologyNode>,
}

impl Topology {
    /// Position of a node by id, hub included.
    pub fn position(&self, id: &str) -> Option<Point> {
        if id == self.hub.id {
            return Some(self.hub.point());
        }
        self.nodes.iter().find(|n| n.id == id).map(TopologyNode::point)
    }

    /// All positions keyed by id, hub included.
    pub fn positions(&self) -> BTreeMap<String, Point> {
        std::iter::once(&self.hub)
            .chain(self.nodes.iter())
            .map(|n| (n.id.clone(), n.point()))
            .collect()
    }

    /// Where a traffic event's marker sits along its edge at `now`.
    ///
    /// Returns `None` if either endpoint is not part of this layout.
    pub fn interpolate(&self, event: &TrafficEvent, now: Instant) -> Option<Point> {
        let from = self.position(&event.source_id)?;
        let to = self.position(&event.target_id)?;
        Some(from.lerp(&to, event.progress(now)))
    }
}

/// Lay out `entities` around a hub centered in a `width × height` viewport.
pub fn layout<S: AsRef<str>>(entities: &[S], width: f64, height: f64) -> Topology {
    let cx = width / 2.0;
    let cy = height / 2.0;
    let radius = RADIUS_FACTOR * width.min(height);
    let n = entities.len();

    let nodes = entities
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let theta = TAU * i as f64 / n as f64;
            TopologyNode {
                id: id.as_ref().to_string(),
                x: cx + radius * theta.cos(),
                y: cy + radius * theta.sin(),
                role: NodeRole::Entity,
            }
        })
        .collect();

    Topology {
        hub: TopologyNode {
            id: HUB_ID.to_string(),
            x: cx,
            y: cy,
            role: NodeRole::Hub,
        },
        nodes,
    }
}

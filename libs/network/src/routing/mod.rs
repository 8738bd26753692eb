//! Stage Routing
//!
//! Maps the stage list carried in a [`Header`] onto connected endpoints.
//! The route cursor is never stored in the header; each process derives its
//! position from its own role, or from which endpoint a frame arrived on.

use crate::error::SendError;
use crate::transports::EndpointId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use types::{Header, Stage};

/// Position of this process in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteRole {
    /// Builds requests; next hop is the first stage
    #[default]
    Origin,
    /// Serves one stage; next hop is the stage after it
    Stage(u32),
    /// Sits between stages; the inbound endpoint's binding is the visited stage
    Relay,
}

/// Index of `stage_id` in the route, if present
pub fn current_stage_index(stages: &[Stage], stage_id: u32) -> Option<usize> {
    stages.iter().position(|s| s.stage_id == stage_id)
}

/// Stage-to-endpoint table plus the local role
#[derive(Debug, Clone, Default)]
pub struct StageRouter {
    role: RouteRole,
    stage_to_endpoint: HashMap<u32, EndpointId>,
    endpoint_to_stage: HashMap<EndpointId, u32>,
}

impl StageRouter {
    pub fn new(role: RouteRole) -> Self {
        Self {
            role,
            ..Default::default()
        }
    }

    pub fn role(&self) -> RouteRole {
        self.role
    }

    pub fn set_role(&mut self, role: RouteRole) {
        self.role = role;
    }

    /// Route `stage_id` to `endpoint`, returning the endpoint it replaced
    pub fn bind_stage(&mut self, stage_id: u32, endpoint: EndpointId) -> Option<EndpointId> {
        let previous = self.stage_to_endpoint.insert(stage_id, endpoint);
        if let Some(old) = previous {
            if old != endpoint {
                self.endpoint_to_stage.remove(&old);
            }
        }
        if let Some(old_stage) = self.endpoint_to_stage.insert(endpoint, stage_id) {
            if old_stage != stage_id {
                self.stage_to_endpoint.remove(&old_stage);
            }
        }
        previous
    }

    /// Drop every binding that points at `endpoint`
    pub fn unbind_endpoint(&mut self, endpoint: EndpointId) -> Option<u32> {
        let stage = self.endpoint_to_stage.remove(&endpoint)?;
        self.stage_to_endpoint.remove(&stage);
        Some(stage)
    }

    pub fn stage_of(&self, endpoint: EndpointId) -> Option<u32> {
        self.endpoint_to_stage.get(&endpoint).copied()
    }

    pub fn endpoint_for(&self, stage_id: u32) -> Option<EndpointId> {
        self.stage_to_endpoint.get(&stage_id).copied()
    }

    pub fn bindings(&self) -> impl Iterator<Item = (u32, EndpointId)> + '_ {
        self.stage_to_endpoint.iter().map(|(s, e)| (*s, *e))
    }

    /// Next stage for a locally originated send
    pub fn next_hop<'a>(&self, header: &'a Header) -> Option<&'a Stage> {
        match self.role {
            RouteRole::Origin | RouteRole::Relay => header.stages().first(),
            RouteRole::Stage(id) => Self::next_hop_after(header, id),
        }
    }

    /// Stage following `visited`; `None` when `visited` is last or absent
    pub fn next_hop_after(header: &Header, visited: u32) -> Option<&Stage> {
        let index = current_stage_index(header.stages(), visited)?;
        header.stages().get(index + 1)
    }

    /// Pick the endpoint for a header, given the endpoint it arrived on
    pub fn resolve(&self, header: &Header, inbound: Option<EndpointId>) -> Result<EndpointId, SendError> {
        let visited = match (self.role, inbound) {
            (RouteRole::Relay, Some(from)) => self.stage_of(from),
            _ => None,
        };
        let stage = match visited {
            Some(visited) => Self::next_hop_after(header, visited),
            None => self.next_hop(header),
        }
        .ok_or(SendError::not_connected(None))?;

        self.endpoint_for(stage.stage_id)
            .ok_or(SendError::not_connected(Some(stage.stage_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::MsgType;

    fn route() -> Header {
        Header::from_parts(MsgType::Prompt, 0, 7, Vec::new())
            .with_stage(1, 0, 2)
            .with_stage(2, 2, 4)
            .with_stage(3, 4, 6)
    }

    #[test]
    fn test_current_stage_index() {
        let header = route();
        assert_eq!(current_stage_index(header.stages(), 1), Some(0));
        assert_eq!(current_stage_index(header.stages(), 3), Some(2));
        assert_eq!(current_stage_index(header.stages(), 9), None);
    }

    #[test]
    fn test_origin_routes_to_first_stage() {
        let mut router = StageRouter::new(RouteRole::Origin);
        router.bind_stage(1, EndpointId::new(10));
        router.bind_stage(2, EndpointId::new(11));

        assert_eq!(router.resolve(&route(), None), Ok(EndpointId::new(10)));
    }

    #[test]
    fn test_stage_role_routes_to_following_stage() {
        let mut router = StageRouter::new(RouteRole::Stage(2));
        router.bind_stage(3, EndpointId::new(12));

        assert_eq!(router.next_hop(&route()).map(|s| s.stage_id), Some(3));
        assert_eq!(router.resolve(&route(), None), Ok(EndpointId::new(12)));
    }

    #[test]
    fn test_last_stage_has_no_next_hop() {
        let router = StageRouter::new(RouteRole::Stage(3));
        assert_eq!(
            router.resolve(&route(), None),
            Err(SendError::not_connected(None))
        );
    }

    #[test]
    fn test_missing_binding_names_stage() {
        let router = StageRouter::new(RouteRole::Origin);
        assert_eq!(
            router.resolve(&route(), None),
            Err(SendError::not_connected(Some(1)))
        );
    }

    #[test]
    fn test_relay_uses_inbound_binding() {
        let mut router = StageRouter::new(RouteRole::Relay);
        let from_stage_one = EndpointId::new(20);
        let to_stage_two = EndpointId::new(21);
        router.bind_stage(1, from_stage_one);
        router.bind_stage(2, to_stage_two);

        assert_eq!(router.resolve(&route(), Some(from_stage_one)), Ok(to_stage_two));
        // unbound inbound endpoint means the frame came from the origin
        assert_eq!(
            router.resolve(&route(), Some(EndpointId::new(99))),
            Ok(from_stage_one)
        );
    }

    #[test]
    fn test_rebinding_replaces_both_directions() {
        let mut router = StageRouter::new(RouteRole::Origin);
        let a = EndpointId::new(2);
        let b = EndpointId::new(3);

        assert_eq!(router.bind_stage(1, a), None);
        assert_eq!(router.bind_stage(1, b), Some(a));
        assert_eq!(router.stage_of(a), None);
        assert_eq!(router.endpoint_for(1), Some(b));

        router.bind_stage(2, b);
        assert_eq!(router.endpoint_for(1), None);
        assert_eq!(router.stage_of(b), Some(2));

        assert_eq!(router.unbind_endpoint(b), Some(2));
        assert_eq!(router.bindings().count(), 0);
    }

    #[test]
    fn test_role_toml_forms() {
        #[derive(Deserialize)]
        struct Wrapper {
            role: RouteRole,
        }
        let parsed: Wrapper = toml::from_str("role = \"relay\"").unwrap();
        assert_eq!(parsed.role, RouteRole::Relay);
        let parsed: Wrapper = toml::from_str("role = { stage = 4 }").unwrap();
        assert_eq!(parsed.role, RouteRole::Stage(4));
    }
}

//! A thin client-side handle to a single remote object (C10): method calls,
//! property access and signal subscription, all addressed by destination
//! service name and object path over a shared [`SessionHandle`].

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::introspect::{self, Node};
use crate::message::Message;
use crate::session::{SessionHandle, SignalStream};
use crate::value::Value;

#[cfg(test)]
mod tests;

const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";

/// A remote object reached through a [`SessionHandle`], identified by the
/// service name that owns it and its object path.
#[derive(Clone)]
pub struct Proxy {
    handle: SessionHandle,
    destination: String,
    path: String,
}

impl Proxy {
    pub fn new(handle: SessionHandle, destination: impl Into<String>, path: impl Into<String>) -> Self {
        Proxy {
            handle,
            destination: destination.into(),
            path: path.into(),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Call a method on this object and wait for its reply.
    pub async fn call(
        &self,
        interface: &str,
        member: &str,
        signature: impl Into<String>,
        body: Vec<Value>,
    ) -> Result<Message> {
        let msg = Message::method_call(self.path.clone(), member, self.handle.next_serial())
            .with_destination(self.destination.clone())
            .with_interface(interface)
            .with_body(signature, body);

        let reply = self.handle.call(msg).await?;
        match reply.kind()? {
            crate::message::MessageKind::Error { error_name, .. } => {
                let text = reply
                    .body
                    .first()
                    .and_then(|v| match v {
                        Value::Str(s) => Some(s.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                Err(Error::dbus(error_name, text))
            }
            _ => Ok(reply),
        }
    }

    /// Call a method without waiting for a reply.
    pub async fn call_no_reply(
        &self,
        interface: &str,
        member: &str,
        signature: impl Into<String>,
        body: Vec<Value>,
    ) -> Result<()> {
        let msg = Message::method_call(self.path.clone(), member, self.handle.next_serial())
            .with_destination(self.destination.clone())
            .with_interface(interface)
            .with_flags(crate::protocol::Flags::NO_REPLY_EXPECTED)
            .with_body(signature, body);

        self.handle.send(msg).await
    }

    /// Fetch and parse this object's introspection document.
    pub async fn introspect(&self) -> Result<Node> {
        let reply = self
            .call(INTROSPECTABLE_INTERFACE, "Introspect", "", Vec::new())
            .await?;

        match reply.body.first() {
            Some(Value::Str(xml)) => introspect::parse_introspection_xml(xml),
            _ => Err(Error::InvalidMessage(
                "Introspect did not return an XML string".into(),
            )),
        }
    }

    /// Introspect this object and build a map of interface name to a proxy
    /// that can invoke it. A node advertising no interfaces of its own but
    /// exactly one child node is treated as a transparent forwarding node:
    /// introspection recurses into that child until interfaces are found.
    pub async fn introspect_interfaces(&self) -> Result<HashMap<String, Proxy>> {
        let mut node = self.introspect().await?;
        let mut path = self.path.clone();

        while node.interfaces.is_empty() {
            let [child] = node.children.as_slice() else {
                break;
            };
            path = join_child_path(&path, child);
            let child_proxy = Proxy::new(self.handle.clone(), self.destination.clone(), path.clone());
            node = child_proxy.introspect().await?;
        }

        let resolved = Proxy::new(self.handle.clone(), self.destination.clone(), path);
        Ok(node
            .interfaces
            .into_iter()
            .map(|iface| (iface.name, resolved.clone()))
            .collect())
    }

    /// Read a single property, unwrapping the `Variant` the bus always
    /// wraps property values in.
    pub async fn get_property(&self, interface: &str, name: &str) -> Result<Value> {
        let reply = self
            .call(
                PROPERTIES_INTERFACE,
                "Get",
                "ss",
                vec![Value::Str(interface.to_string()), Value::Str(name.to_string())],
            )
            .await?;

        match reply.body.into_iter().next() {
            Some(Value::Variant(_, inner)) => Ok(*inner),
            Some(other) => Ok(other),
            None => Err(Error::InvalidMessage("Get returned no value".into())),
        }
    }

    /// Write a single property. `ty` is the property's own signature (one
    /// complete type), used to wrap `value` in the required `Variant`.
    pub async fn set_property(
        &self,
        interface: &str,
        name: &str,
        ty: impl Into<String>,
        value: Value,
    ) -> Result<()> {
        self.call(
            PROPERTIES_INTERFACE,
            "Set",
            "ssv",
            vec![
                Value::Str(interface.to_string()),
                Value::Str(name.to_string()),
                Value::Variant(ty.into(), Box::new(value)),
            ],
        )
        .await?;
        Ok(())
    }

    /// Read every property exposed on `interface` at once.
    pub async fn get_all_properties(&self, interface: &str) -> Result<Vec<(String, Value)>> {
        let reply = self
            .call(
                PROPERTIES_INTERFACE,
                "GetAll",
                "s",
                vec![Value::Str(interface.to_string())],
            )
            .await?;

        match reply.body.into_iter().next() {
            Some(Value::Array(entries)) => entries
                .into_iter()
                .map(|entry| match entry {
                    Value::DictEntry(key, val) => {
                        let Value::Str(key) = *key else {
                            return Err(Error::InvalidMessage(
                                "GetAll dict key was not a string".into(),
                            ));
                        };
                        let val = match *val {
                            Value::Variant(_, inner) => *inner,
                            other => other,
                        };
                        Ok((key, val))
                    }
                    _ => Err(Error::InvalidMessage("GetAll entry was not a dict entry".into())),
                })
                .collect(),
            _ => Err(Error::InvalidMessage("GetAll did not return an array".into())),
        }
    }

    /// Subscribe to a signal emitted by this specific object and interface.
    pub async fn on(&self, interface: &str, member: &str) -> Result<SignalStream> {
        self.handle
            .subscribe(
                Some(self.path.clone()),
                Some(interface.to_string()),
                Some(member.to_string()),
            )
            .await
    }
}

fn join_child_path(path: &str, child: &str) -> String {
    if path == "/" {
        format!("/{child}")
    } else {
        format!("{path}/{child}")
    }
}

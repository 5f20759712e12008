//! Embeddable chat widget: the iframe page and its loader script.
//!
//! Host pages include `<script src="{public_url}/embed.js"></script>`; the
//! loader injects an iframe pointing at `/embed`, which opens a guest session
//! and talks to `/api/chat/send`. Framing is controlled with the CSP
//! `frame-ancestors` directive only; `X-Frame-Options` is never sent.

/// Value for the `Content-Security-Policy` header on `/embed`.
pub fn frame_ancestors_policy(allowed: &[String]) -> String {
    let sources: Vec<&str> = allowed
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if sources.is_empty() {
        "frame-ancestors 'self'".to_string()
    } else {
        format!("frame-ancestors {}", sources.join(" "))
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn embed_page(public_url: &str) -> String {
    let base = escape_attr(public_url.trim_end_matches('/'));
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Veteran Assistant</title>
<style>
  body {{ margin: 0; font-family: system-ui, sans-serif; display: flex; flex-direction: column; height: 100vh; }}
  #log {{ flex: 1; overflow-y: auto; padding: 12px; }}
  .msg {{ margin: 6px 0; padding: 8px 10px; border-radius: 8px; white-space: pre-wrap; }}
  .user {{ background: #e8eef7; align-self: flex-end; }}
  .assistant {{ background: #f4f4f4; }}
  .notice {{ color: #a33; font-size: 0.9em; }}
  form {{ display: flex; border-top: 1px solid #ddd; }}
  textarea {{ flex: 1; border: 0; padding: 10px; resize: none; font: inherit; }}
  button {{ border: 0; padding: 0 16px; background: #1d3f72; color: #fff; }}
</style>
</head>
<body data-api="{base}">
<div id="log"></div>
<form id="composer">
  <textarea id="input" rows="2" placeholder="Ask about benefits, jobs, housing..."></textarea>
  <button type="submit">Send</button>
</form>
<script>
(function () {{
  var api = document.body.dataset.api;
  var log = document.getElementById("log");
  var input = document.getElementById("input");
  var token = null;
  var conversationId = null;

  function add(cls, text) {{
    var el = document.createElement("div");
    el.className = "msg " + cls;
    el.textContent = text;
    log.appendChild(el);
    log.scrollTop = log.scrollHeight;
  }}

  function session() {{
    if (token) return Promise.resolve(token);
    return fetch(api + "/api/session", {{
      method: "POST",
      headers: {{ "Content-Type": "application/json" }},
      body: "{{}}"
    }}).then(function (r) {{ return r.json(); }})
      .then(function (body) {{ token = body.token; return token; }});
  }}

  document.getElementById("composer").addEventListener("submit", function (ev) {{
    ev.preventDefault();
    var text = input.value.trim();
    if (!text) return;
    input.value = "";
    add("user", text);
    session().then(function (t) {{
      return fetch(api + "/api/chat/send", {{
        method: "POST",
        headers: {{ "Content-Type": "application/json", "Authorization": "Bearer " + t }},
        body: JSON.stringify({{ message: text, conversation_id: conversationId }})
      }});
    }}).then(function (r) {{ return r.json(); }})
      .then(function (body) {{
        if (body.error) {{ add("notice", body.error.message); return; }}
        conversationId = body.conversation_id;
        add("assistant", body.message);
      }})
      .catch(function () {{ add("notice", "Connection problem. Please try again."); }});
  }});
}})();
</script>
</body>
</html>
"#
    )
}

pub fn loader_script(public_url: &str) -> String {
    let base = public_url.trim_end_matches('/');
    let base_json = serde_json::to_string(base).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(function () {{
  var base = {base_json};
  var script = document.currentScript;
  var frame = document.createElement("iframe");
  frame.src = base + "/embed";
  frame.title = "Veteran Assistant";
  frame.style.border = "0";
  frame.style.width = (script && script.dataset.width) || "380px";
  frame.style.height = (script && script.dataset.height) || "560px";
  var target = script && script.dataset.target && document.querySelector(script.dataset.target);
  (target || document.body).appendChild(frame);
}})();
"#
    )
}

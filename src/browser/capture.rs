//! In-page scripts: DOM capture, element marking, index overlays.

use crate::dom::SelectorMap;

/// Attribute set on the element an interaction targets, so CSS-based eoka
/// calls can reach an XPath-located node.
pub(crate) const TARGET_ATTRIBUTE: &str = "data-pilot-target";

/// Serializes `document.body` into the flat node list the indexer reads
/// (see [`crate::dom::SnapshotNode`]): document order, each node carrying
/// the position of its parent.
///
/// Elements carry every attribute plus two layout flags: `visible`
/// (non-empty box, not hidden by CSS) and `top` (the element or one of its
/// descendants is hit at one of five sample points, so it is in the viewport
/// and not covered). Children of opaque tags are not serialized.
pub(crate) const CAPTURE_JS: &str = r#"
(() => {
    const OPAQUE = new Set(['svg', 'iframe', 'script', 'style', 'link', 'meta', 'noscript', 'template']);
    const SAMPLES = [[0.25, 0.25], [0.75, 0.25], [0.25, 0.75], [0.75, 0.75], [0.5, 0.5]];

    function isVisible(el) {
        if (!(el.offsetWidth > 0 && el.offsetHeight > 0)) return false;
        const style = getComputedStyle(el);
        return style.visibility !== 'hidden' && style.display !== 'none';
    }

    function isTop(el) {
        const rect = el.getBoundingClientRect();
        return SAMPLES.some(([fx, fy]) => {
            let current = document.elementFromPoint(rect.left + rect.width * fx, rect.top + rect.height * fy);
            while (current && current !== document.body) {
                if (current === el) return true;
                current = current.parentElement;
            }
            return false;
        });
    }

    function isTextVisible(node, parentVisible) {
        if (!parentVisible) return false;
        const range = document.createRange();
        range.selectNodeContents(node);
        const rect = range.getBoundingClientRect();
        return rect.width !== 0 && rect.height !== 0 && rect.top >= 0 && rect.top <= window.innerHeight;
    }

    if (!document.body) {
        return JSON.stringify([{ type: 'element', parent: null, tag: 'body', attributes: {}, visible: true, top: false }]);
    }

    const nodes = [];
    const stack = [[document.body, null, true]];
    while (stack.length) {
        const [node, parent, parentVisible] = stack.pop();
        if (node.nodeType === Node.TEXT_NODE) {
            nodes.push({ type: 'text', parent, text: node.textContent, visible: isTextVisible(node, parentVisible) });
            continue;
        }

        const tag = node.tagName.toLowerCase();
        const attributes = {};
        for (const attr of node.attributes) {
            if (attr.name !== 'data-pilot-target') attributes[attr.name] = attr.value;
        }
        const visible = isVisible(node);
        const position = nodes.length;
        nodes.push({ type: 'element', parent, tag, attributes, visible, top: visible && isTop(node) });
        if (OPAQUE.has(tag)) continue;

        const children = [...node.childNodes].filter(child =>
            child.nodeType === Node.ELEMENT_NODE ||
            (child.nodeType === Node.TEXT_NODE && child.textContent.trim()));
        for (let i = children.length - 1; i >= 0; i--) {
            stack.push([children[i], position, visible]);
        }
    }
    return JSON.stringify(nodes);
})()
"#;

/// Resolve `locator` and tag the node with [`TARGET_ATTRIBUTE`]. The script
/// evaluates to `true` when the node exists.
pub(crate) fn mark_target_js(locator: &str) -> String {
    format!(
        r#"
(() => {{
    document.querySelectorAll('[{attr}]').forEach(e => e.removeAttribute('{attr}'));
    const el = document.evaluate({xpath}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
    if (!el || el.nodeType !== Node.ELEMENT_NODE) return false;
    el.scrollIntoView({{ block: 'center', inline: 'center' }});
    el.setAttribute('{attr}', '1');
    return true;
}})()
"#,
        attr = TARGET_ATTRIBUTE,
        xpath = js_string(locator),
    )
}

pub(crate) fn unmark_target_js() -> String {
    format!(
        "document.querySelectorAll('[{attr}]').forEach(e => e.removeAttribute('{attr}'))",
        attr = TARGET_ATTRIBUTE
    )
}

/// CSS selector for the marked node.
pub(crate) fn target_selector() -> String {
    format!("[{}]", TARGET_ATTRIBUTE)
}

/// Draw a numbered box over every element of `map`. Elements are located by
/// XPath inside the page, so no bounding boxes are needed up front.
pub(crate) fn highlight_js(map: &SelectorMap) -> String {
    let data: Vec<serde_json::Value> = map
        .iter()
        .map(|el| serde_json::json!({ "i": el.index, "xpath": el.locator }))
        .collect();

    format!(
        r#"
(() => {{
    const data = {json};
    const container = document.createElement('div');
    container.id = '__pilot_overlay';

    const style = document.createElement('style');
    style.textContent = `
        .__pilot_label {{
            position: fixed;
            z-index: 2147483647;
            background: rgba(220, 38, 38, 0.9);
            color: white;
            font: bold 10px/12px monospace;
            padding: 1px 3px;
            border-radius: 2px;
            pointer-events: none;
            white-space: nowrap;
        }}
        .__pilot_box {{
            position: fixed;
            z-index: 2147483646;
            border: 1.5px solid rgba(220, 38, 38, 0.7);
            pointer-events: none;
            border-radius: 1px;
        }}
    `;
    container.appendChild(style);

    const placed = [];
    const vw = window.innerWidth, vh = window.innerHeight;

    for (const item of data) {{
        const el = document.evaluate(item.xpath, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
        if (!el || !el.getBoundingClientRect) continue;
        const r = el.getBoundingClientRect();
        if (r.width === 0 || r.height === 0) continue;

        const box = document.createElement('div');
        box.className = '__pilot_box';
        box.style.cssText = 'left:' + r.left + 'px;top:' + r.top + 'px;width:' + r.width + 'px;height:' + r.height + 'px';
        container.appendChild(box);

        // Prefer above-left, then above-right, below-left, inside.
        const labelW = String(item.i).length * 7 + 8;
        const labelH = 14;
        const clampX = v => Math.max(0, Math.min(v, vw - labelW));
        const clampY = v => Math.max(0, Math.min(v, vh - labelH));
        const candidates = [
            [clampX(r.left), clampY(r.top - labelH - 1)],
            [clampX(r.right - labelW), clampY(r.top - labelH - 1)],
            [clampX(r.left), clampY(r.bottom + 1)],
            [clampX(r.left + 2), clampY(r.top + 2)],
        ];

        let [bestX, bestY] = candidates[0];
        for (const [cx, cy] of candidates) {{
            const overlaps = placed.some(p =>
                cx < p[0] + p[2] && cx + labelW > p[0] && cy < p[1] + p[3] && cy + labelH > p[1]);
            if (!overlaps) {{
                bestX = cx;
                bestY = cy;
                break;
            }}
        }}
        placed.push([bestX, bestY, labelW, labelH]);

        const label = document.createElement('div');
        label.className = '__pilot_label';
        label.style.cssText = 'left:' + bestX + 'px;top:' + bestY + 'px';
        label.textContent = String(item.i);
        container.appendChild(label);
    }}

    document.body.appendChild(container);
}})()
"#,
        json = serde_json::Value::Array(data)
    )
}

pub(crate) const REMOVE_HIGHLIGHT_JS: &str =
    "document.getElementById('__pilot_overlay')?.remove()";

/// Quote `s` as a JS string literal.
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
